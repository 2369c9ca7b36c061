//! Process-scoped service container.
//!
//! All shared mutable state lives here, explicitly constructed and owned:
//! the lazily-loaded classifier, the result cache handle, the remote
//! client, and (inside the pipeline) the override-block marker. One
//! instance per process, shared via `Arc`.

use std::sync::Arc;

use crate::config;
use crate::db::DatabaseError;
use crate::models::AnalysisResult;
use crate::pipeline::classifier::ClassifierService;
use crate::pipeline::codec::RasterCodec;
use crate::pipeline::normalize::NormalizerConfig;
use crate::pipeline::orchestrator::{
    AnalysisOptions, AnalysisPipeline, PipelineOutcome, ProgressSink, RunToken,
};
use crate::pipeline::remote::{HttpAnalysisTransport, RemoteAnalysisClient};
use crate::pipeline::{PipelineError, SqliteResultCache, Upload};

/// Shared application state.
pub struct CoreState {
    pipeline: Arc<AnalysisPipeline>,
}

impl CoreState {
    /// Wrap an already-assembled pipeline (tests, custom wiring).
    pub fn new(pipeline: AnalysisPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Production wiring: raster codec, SQLite cache under the app data
    /// directory, HTTP transport from the environment, and the on-device
    /// classifier when compiled in.
    pub fn with_default_services() -> Result<Self, DatabaseError> {
        let cache = SqliteResultCache::open(&config::cache_db_path())?;
        let remote = RemoteAnalysisClient::new(Arc::new(HttpAnalysisTransport::from_env()));

        let pipeline = AnalysisPipeline::new(
            Box::new(RasterCodec),
            NormalizerConfig::default(),
            ClassifierService::new(default_classifier_loader()),
            Arc::new(cache),
            remote,
        );
        Ok(Self::new(pipeline))
    }

    pub fn pipeline(&self) -> &Arc<AnalysisPipeline> {
        &self.pipeline
    }

    /// Run an analysis off the caller's thread.
    ///
    /// The pipeline body is synchronous (decode, inference, blocking HTTP),
    /// so it runs on the blocking pool; the async caller just awaits the
    /// outcome and can drop the token to ignore a stale completion.
    pub async fn analyze(
        &self,
        upload: Upload,
        options: AnalysisOptions,
        sink: Arc<dyn ProgressSink>,
        token: RunToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::task::spawn_blocking(move || pipeline.analyze(&upload, &options, &*sink, &token))
            .await
            .expect("analysis task panicked")
    }

    /// Render a thumbnail for a stored result's display image.
    pub fn thumbnail(&self, result: &AnalysisResult, max_edge: u32) -> Option<String> {
        use crate::pipeline::normalize::ImageNormalizer;

        let codec = RasterCodec;
        ImageNormalizer::new(&codec, NormalizerConfig::default())
            .thumbnail(&result.image_data_uri, max_edge)
            .ok()
    }
}

/// Classifier loader for this build.
#[cfg(feature = "onnx-classifier")]
fn default_classifier_loader() -> Box<dyn crate::pipeline::classifier::ClassifierLoader> {
    Box::new(crate::pipeline::mobilenet::FileClassifierLoader::default_location())
}

#[cfg(not(feature = "onnx-classifier"))]
fn default_classifier_loader() -> Box<dyn crate::pipeline::classifier::ClassifierLoader> {
    Box::new(crate::pipeline::classifier::UnavailableLoader)
}
