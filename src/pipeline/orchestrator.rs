//! Pipeline orchestration: normalize → fingerprint → local gate → cache →
//! remote analysis, with stage/progress reporting and the block-override
//! policy.
//!
//! Decision policy:
//! - a hard block from the gate aborts before any network spend; uploading
//!   the exact same image again overrides it once, with a warning
//! - the result cache is consulted (and written) only when the gate itself
//!   was confident the image is food — uncertain classifications must not
//!   poison the cache in either direction
//! - a cache hit returns immediately; no remote call is made

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::{AnalysisResult, BoundingBox};

use super::cache::ResultCache;
use super::classifier::ClassifierService;
use super::codec::ImageCodec;
use super::detector::{self, friendly_label, Verdict};
use super::fingerprint::{fingerprint_data_uri, Fingerprint};
use super::messages::UserMessages;
use super::normalize::{ImageNormalizer, NormalizerConfig, Upload};
use super::remote::RemoteAnalysisClient;
use super::{DetectionContext, PipelineError};

// ═══════════════════════════════════════════════════════════
// Stage & progress
// ═══════════════════════════════════════════════════════════

/// Pipeline stage, as exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Idle,
    Compressing,
    Detecting,
    CheckingCache,
    Analyzing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Compressing => "compressing",
            Self::Detecting => "detecting",
            Self::CheckingCache => "checking-cache",
            Self::Analyzing => "analyzing",
        }
    }
}

/// Observer for stage transitions and warnings.
pub trait ProgressSink: Send + Sync {
    fn on_stage(&self, stage: Stage, progress: u8);
    fn on_warning(&self, message: &str);
}

/// Sink that ignores everything.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_stage(&self, _stage: Stage, _progress: u8) {}
    fn on_warning(&self, _message: &str) {}
}

/// Liveness flag for one pipeline run.
///
/// The caller holds a clone; abandoning it stops further sink
/// notifications so a stale completion is never applied to UI state. The
/// in-flight work itself is not preempted.
#[derive(Clone)]
pub struct RunToken {
    live: Arc<AtomicBool>,
}

impl RunToken {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn abandon(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Override slot
// ═══════════════════════════════════════════════════════════

/// Single-slot memory of the last hard-blocked image.
///
/// Deliberately remembers only the most recent block: blocking image G
/// after image F forgets F's block, so F would be blocked again on
/// re-upload. Multi-image block history is unsupported.
#[derive(Debug, Default)]
pub struct OverrideSlot {
    blocked: Option<Fingerprint>,
}

impl OverrideSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// If `fingerprint` is the currently blocked image, consume the block
    /// (one-shot override). Otherwise leave state untouched.
    fn try_consume(&mut self, fingerprint: &Fingerprint) -> bool {
        if self.blocked.as_ref() == Some(fingerprint) {
            self.blocked = None;
            true
        } else {
            false
        }
    }

    /// Record a hard block, superseding any previous one.
    fn note_block(&mut self, fingerprint: Fingerprint) {
        self.blocked = Some(fingerprint);
    }
}

// ═══════════════════════════════════════════════════════════
// Options & outcome
// ═══════════════════════════════════════════════════════════

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    /// Region hints for multi-item recognition.
    pub regions: Vec<BoundingBox>,
}

/// Successful run: the result plus any warning raised along the way.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub result: AnalysisResult,
    pub warning: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// AnalysisPipeline
// ═══════════════════════════════════════════════════════════

/// The assembled pipeline. One instance per process; all services are
/// injected so every seam is swappable in tests.
pub struct AnalysisPipeline {
    codec: Box<dyn ImageCodec>,
    normalizer_config: NormalizerConfig,
    classifier: ClassifierService,
    cache: Arc<dyn ResultCache>,
    remote: RemoteAnalysisClient,
    override_slot: Mutex<OverrideSlot>,
}

impl AnalysisPipeline {
    pub fn new(
        codec: Box<dyn ImageCodec>,
        normalizer_config: NormalizerConfig,
        classifier: ClassifierService,
        cache: Arc<dyn ResultCache>,
        remote: RemoteAnalysisClient,
    ) -> Self {
        Self {
            codec,
            normalizer_config,
            classifier,
            cache,
            remote,
            override_slot: Mutex::new(OverrideSlot::new()),
        }
    }

    /// Run the full pipeline on one upload.
    pub fn analyze(
        &self,
        upload: &Upload,
        options: &AnalysisOptions,
        sink: &dyn ProgressSink,
        token: &RunToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let _span = tracing::info_span!("analyze_upload", size = upload.bytes.len()).entered();

        // Step 1: Normalize (validate, upright, downscale, re-encode)
        self.emit(sink, token, Stage::Compressing, 10);
        let normalizer = ImageNormalizer::new(&*self.codec, self.normalizer_config.clone());
        let encoded = normalizer.normalize(upload)?;

        // Step 2: Fingerprint the normalized image
        let fingerprint = fingerprint_data_uri(&encoded.data_uri);

        // Step 3: Local pre-screen + override policy
        self.emit(sink, token, Stage::Detecting, 30);
        let verdict = self.screen(&encoded.decoded_bytes().unwrap_or_default());
        debug!(
            is_food = verdict.is_food,
            food_confidence = verdict.food_confidence,
            non_food_confidence = verdict.non_food_confidence,
            reason = %verdict.reason,
            "Local pre-screen verdict"
        );

        let mut warning = None;
        if verdict.is_blockable() {
            let mut slot = self
                .override_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.try_consume(&fingerprint) {
                // Same image re-uploaded after a block: let it through once
                let message = UserMessages::override_warning(&verdict);
                if token.is_live() {
                    sink.on_warning(&message);
                }
                warning = Some(message);
                info!(fingerprint = %fingerprint, "Block overridden by re-upload");
            } else {
                slot.note_block(fingerprint.clone());
                info!(fingerprint = %fingerprint, "Upload hard-blocked by local pre-screen");
                return Err(PipelineError::HardBlocked {
                    detection: detection_context(&verdict),
                });
            }
        }

        // Step 4: Cache lookup, only when the gate trusts its own judgment
        if verdict.trusts_cache() {
            self.emit(sink, token, Stage::CheckingCache, 50);
            if let Some(mut cached) = self.cache.get(&fingerprint) {
                cached.image_data_uri = encoded.data_uri.clone();
                info!(fingerprint = %fingerprint, "Served from result cache; no remote call");
                self.emit(sink, token, Stage::Idle, 100);
                return Ok(PipelineOutcome {
                    result: cached,
                    warning,
                });
            }
        } else {
            debug!("Confidence below cache threshold; bypassing cache");
        }

        // Step 5: Remote analysis
        self.emit(sink, token, Stage::Analyzing, 70);
        let mut result =
            self.remote
                .analyze(&encoded, &options.regions)
                .map_err(|source| PipelineError::Remote {
                    source,
                    detection: detection_context(&verdict),
                })?;

        // Step 6: Attach display image, write through, finish
        result.image_data_uri = encoded.data_uri.clone();
        if verdict.trusts_cache() {
            self.cache.put(&fingerprint, &result);
        }

        self.emit(sink, token, Stage::Idle, 100);
        Ok(PipelineOutcome { result, warning })
    }

    /// Classify with the lazily-loaded model; infrastructure failures pass.
    fn screen(&self, image_bytes: &[u8]) -> Verdict {
        match self.classifier.ensure_loaded() {
            Ok(classifier) => detector::screen(&*classifier, image_bytes),
            Err(e) => {
                warn!(error = %e, "Classifier unavailable; passing image through");
                Verdict::fail_open(&e.to_string())
            }
        }
    }

    fn emit(&self, sink: &dyn ProgressSink, token: &RunToken, stage: Stage, progress: u8) {
        if token.is_live() {
            sink.on_stage(stage, progress);
        }
    }
}

fn detection_context(verdict: &Verdict) -> Option<DetectionContext> {
    verdict.top_prediction().map(|top| DetectionContext {
        label: friendly_label(&top.label),
        confidence: top.probability,
    })
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
