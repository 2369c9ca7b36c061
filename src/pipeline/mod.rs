pub mod cache;
pub mod classifier;
pub mod codec;
pub mod detector;
pub mod fingerprint;
pub mod messages;
pub mod mobilenet;
pub mod normalize;
pub mod orchestrator;
pub mod remote;

pub use cache::{MemoryResultCache, ResultCache, SqliteResultCache};
pub use classifier::{ClassifierLoader, ClassifierService, PrebuiltLoader, UnavailableLoader};
pub use codec::{EncodedFormat, ImageCodec, ImageError, RasterCodec};
pub use detector::{Classifier, ClassifierError, Prediction, Verdict};
pub use fingerprint::{fingerprint_data_uri, Fingerprint};
pub use messages::UserMessages;
pub use normalize::{EncodedImage, ImageNormalizer, NormalizerConfig, Upload};
pub use orchestrator::{
    AnalysisOptions, AnalysisPipeline, NullProgress, PipelineOutcome, ProgressSink, RunToken,
    Stage,
};
pub use remote::{
    AnalysisTransport, HttpAnalysisTransport, RemoteAnalysisClient, RemoteError,
};

use thiserror::Error;

/// What the local classifier saw, attached to errors for richer messages.
#[derive(Debug, Clone)]
pub struct DetectionContext {
    /// Friendly top label.
    pub label: String,
    /// Top-1 probability (0.0-1.0).
    pub confidence: f32,
}

/// Terminal pipeline failures — one tag per caller-distinguishable kind.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Image(#[from] ImageError),

    #[error("{source}")]
    Remote {
        #[source]
        source: RemoteError,
        detection: Option<DetectionContext>,
    },

    #[error("Image rejected by the local pre-screen")]
    HardBlocked { detection: Option<DetectionContext> },
}

impl PipelineError {
    /// Actionable message for the user.
    pub fn user_message(&self) -> String {
        UserMessages::for_error(self)
    }
}
