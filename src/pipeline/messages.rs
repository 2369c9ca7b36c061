//! User-facing message templates for pipeline outcomes.
//!
//! Every abort carries a specific, actionable message. Where the local
//! classifier produced a judgment, "not food" style messages are enriched
//! with its top label and confidence so the user knows what the model saw.

use super::codec::ImageError;
use super::detector::Verdict;
use super::remote::RemoteError;
use super::{DetectionContext, PipelineError};

/// Message template builder for pipeline errors and warnings.
pub struct UserMessages;

impl UserMessages {
    /// Terminal error message for a failed run.
    pub fn for_error(error: &PipelineError) -> String {
        match error {
            PipelineError::Image(image_error) => Self::for_image_error(image_error),
            PipelineError::Remote { source, detection } => {
                Self::for_remote_error(source, detection.as_ref())
            }
            PipelineError::HardBlocked { detection } => Self::hard_blocked(detection.as_ref()),
        }
    }

    fn for_image_error(error: &ImageError) -> String {
        match error {
            ImageError::UnsupportedFormat { media_type } => format!(
                "This file type ({media_type}) is not supported. \
                 Please upload a JPEG, PNG, or WebP photo."
            ),
            ImageError::FileTooLarge { size, limit } => format!(
                "This photo is too large ({} MB, limit {} MB). \
                 Please upload a smaller photo.",
                size / (1024 * 1024),
                limit / (1024 * 1024),
            ),
            ImageError::DecodeError(_) => {
                "This file could not be read as an image. Please upload a valid photo.".into()
            }
            ImageError::CompressionFailed => {
                "The photo could not be processed. Please try a different photo.".into()
            }
        }
    }

    fn for_remote_error(error: &RemoteError, detection: Option<&DetectionContext>) -> String {
        match error {
            RemoteError::ImageUnclear { .. } => {
                "The photo is not clear enough to identify the food. \
                 Please upload a sharper, well-lit photo."
                    .into()
            }
            RemoteError::NotFood { .. } => {
                let mut message = String::from("This doesn't look like a food photo");
                if let Some(d) = detection {
                    message.push_str(&format!(
                        " (recognized as {}, {:.0}% confidence)",
                        d.label,
                        d.confidence * 100.0
                    ));
                }
                message.push_str(". Please upload a photo that contains food.");
                message
            }
            RemoteError::NoFoodDetected => {
                let mut message = String::from("No food was detected");
                if let Some(d) = detection {
                    message.push_str(&format!(
                        " (locally recognized as {}, {:.0}% confidence)",
                        d.label,
                        d.confidence * 100.0
                    ));
                }
                message.push_str(". Please upload a photo with clearly visible food.");
                message
            }
            RemoteError::RequestTimeout => {
                "The analysis is taking too long. \
                 Try a photo with fewer distinct foods, or a smaller image."
                    .into()
            }
            RemoteError::NetworkError(_) => {
                "Could not reach the analysis service. Please check your connection and retry."
                    .into()
            }
            RemoteError::AnalysisFailed { message } => {
                format!("The analysis failed: {message}. Please try again later.")
            }
        }
    }

    /// Hard block by the local pre-screen.
    pub fn hard_blocked(detection: Option<&DetectionContext>) -> String {
        let mut message = String::from("This doesn't look like a food photo");
        if let Some(d) = detection {
            message.push_str(&format!(
                " (recognized as {}, {:.0}% confidence)",
                d.label,
                d.confidence * 100.0
            ));
        }
        message.push_str(
            ". If you are sure it contains food, upload the same photo again to continue.",
        );
        message
    }

    /// Warning shown when a previously blocked image is let through.
    pub fn override_warning(verdict: &Verdict) -> String {
        let mut message =
            String::from("The on-device check still thinks this may not be a food photo");
        if let Some(top) = verdict.top_prediction() {
            message.push_str(&format!(
                " (recognized as {}, {:.0}% confidence)",
                super::detector::friendly_label(&top.label),
                top.probability * 100.0
            ));
        }
        message.push_str(". Continuing with cloud analysis since you re-uploaded it.");
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detector::{evaluate, Prediction};

    fn laptop_verdict() -> Verdict {
        evaluate(vec![Prediction {
            label: "laptop, laptop computer".into(),
            probability: 0.9,
        }])
    }

    #[test]
    fn hard_block_names_the_detected_object() {
        let message = UserMessages::hard_blocked(Some(&DetectionContext {
            label: "laptop".into(),
            confidence: 0.9,
        }));
        assert!(message.contains("laptop"));
        assert!(message.contains("90%"));
        assert!(message.contains("upload the same photo again"));
    }

    #[test]
    fn hard_block_without_detection_still_actionable() {
        let message = UserMessages::hard_blocked(None);
        assert!(message.contains("upload the same photo again"));
    }

    #[test]
    fn not_food_enriched_with_local_detection() {
        let error = PipelineError::Remote {
            source: RemoteError::NotFood {
                message: "no food".into(),
            },
            detection: Some(DetectionContext {
                label: "sports car".into(),
                confidence: 0.77,
            }),
        };
        let message = UserMessages::for_error(&error);
        assert!(message.contains("sports car"));
        assert!(message.contains("77%"));
    }

    #[test]
    fn timeout_suggests_simplifying_the_image() {
        let error = PipelineError::Remote {
            source: RemoteError::RequestTimeout,
            detection: None,
        };
        let message = UserMessages::for_error(&error);
        assert!(message.contains("fewer distinct foods") || message.contains("smaller image"));
    }

    #[test]
    fn file_too_large_reports_sizes_in_mb() {
        let error = PipelineError::Image(crate::pipeline::codec::ImageError::FileTooLarge {
            size: 12 * 1024 * 1024,
            limit: 10 * 1024 * 1024,
        });
        let message = UserMessages::for_error(&error);
        assert!(message.contains("12 MB"));
        assert!(message.contains("10 MB"));
    }

    #[test]
    fn override_warning_names_top_prediction() {
        let message = UserMessages::override_warning(&laptop_verdict());
        assert!(message.contains("laptop"));
        assert!(message.contains("re-uploaded"));
    }
}
