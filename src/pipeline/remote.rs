//! Remote vision analysis client.
//!
//! One HTTP call against a slow, rate-limited vision endpoint. The client
//! owns the timeout-escalation policy (one retry at an extended timeout,
//! on timeout only) and translates the wire envelope — success payloads,
//! structured error codes, transport failures — into a tagged error
//! taxonomy callers can match on.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{AnalysisResult, BoundingBox, ConfidenceTag, FoodItem, NutritionInfo};

use super::normalize::EncodedImage;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// First attempt timeout.
pub const PRIMARY_TIMEOUT: Duration = Duration::from_secs(60);

/// Extended timeout for the single retry after a primary timeout.
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// Default analysis endpoint (override with SNAPCAL_API_ENDPOINT).
const DEFAULT_ENDPOINT: &str = "http://localhost:8787";

// ═══════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════

/// Request body for POST /api/analyze.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    /// Image as a data URI.
    pub image: String,
    /// Format tag ("jpeg" | "webp").
    pub format: String,
    /// Optional region hints for multi-item recognition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<BoundingBox>>,
}

/// Tagged response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub data: Option<AnalyzeData>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeData {
    pub foods: Vec<WireFood>,
    pub total_calories: Option<f64>,
    pub confidence: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFood {
    pub name: String,
    pub portion: Option<String>,
    pub ingredients: Option<String>,
    pub calories: f64,
    pub nutrition: WireNutrition,
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireNutrition {
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
    pub fiber: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

/// Remote analysis failures, one variant per caller-distinguishable kind.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Image too unclear to analyze: {message}")]
    ImageUnclear { message: String },

    #[error("Image does not appear to contain food: {message}")]
    NotFood { message: String },

    #[error("No food detected in the image")]
    NoFoodDetected,

    #[error("Analysis timed out (after extended retry)")]
    RequestTimeout,

    #[error("Network failure: {0}")]
    NetworkError(String),

    #[error("Analysis failed: {message}")]
    AnalysisFailed { message: String },
}

/// Transport-level outcome, before envelope interpretation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport failure: {0}")]
    Other(String),
}

// ═══════════════════════════════════════════════════════════
// Transport
// ═══════════════════════════════════════════════════════════

/// One attempt against the analysis endpoint with a caller-chosen timeout.
pub trait AnalysisTransport: Send + Sync {
    fn send(
        &self,
        request: &AnalyzeRequest,
        timeout: Duration,
    ) -> Result<AnalyzeResponse, TransportError>;
}

/// Production transport over reqwest's blocking client.
pub struct HttpAnalysisTransport {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpAnalysisTransport {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Endpoint from SNAPCAL_API_ENDPOINT, falling back to localhost.
    pub fn from_env() -> Self {
        let endpoint =
            std::env::var("SNAPCAL_API_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.into());
        Self::new(&endpoint)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl AnalysisTransport for HttpAnalysisTransport {
    fn send(
        &self,
        request: &AnalyzeRequest,
        timeout: Duration,
    ) -> Result<AnalyzeResponse, TransportError> {
        let url = format!("{}/api/analyze", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Other(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        // Error envelopes ride on non-2xx statuses too — decode first,
        // fall back to the raw status only for unstructured bodies.
        match serde_json::from_str::<AnalyzeResponse>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(TransportError::Http {
                status: status.as_u16(),
                message: truncate(&body, 200).to_string(),
            }),
            Err(e) => Err(TransportError::Other(format!("malformed response: {e}"))),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }
    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ═══════════════════════════════════════════════════════════
// RemoteAnalysisClient
// ═══════════════════════════════════════════════════════════

/// Analysis client with timeout escalation and envelope decoding.
pub struct RemoteAnalysisClient {
    transport: Arc<dyn AnalysisTransport>,
    primary_timeout: Duration,
    fallback_timeout: Duration,
}

impl RemoteAnalysisClient {
    pub fn new(transport: Arc<dyn AnalysisTransport>) -> Self {
        Self {
            transport,
            primary_timeout: PRIMARY_TIMEOUT,
            fallback_timeout: FALLBACK_TIMEOUT,
        }
    }

    /// Override the timeout pair (tests).
    pub fn with_timeouts(mut self, primary: Duration, fallback: Duration) -> Self {
        self.primary_timeout = primary;
        self.fallback_timeout = fallback;
        self
    }

    /// Analyze an encoded image, with optional region hints.
    pub fn analyze(
        &self,
        image: &EncodedImage,
        regions: &[BoundingBox],
    ) -> Result<AnalysisResult, RemoteError> {
        let request = AnalyzeRequest {
            image: image.data_uri.clone(),
            format: image.format.as_str().to_string(),
            regions: if regions.is_empty() {
                None
            } else {
                Some(regions.to_vec())
            },
        };

        let start = std::time::Instant::now();
        let envelope = self.send_with_escalation(&request)?;
        info!(
            elapsed_ms = %start.elapsed().as_millis(),
            "Remote analysis responded"
        );

        decode_envelope(envelope)
    }

    /// Primary attempt, then exactly one retry at the extended timeout —
    /// and only for timeouts. Other failures surface immediately.
    fn send_with_escalation(
        &self,
        request: &AnalyzeRequest,
    ) -> Result<AnalyzeResponse, RemoteError> {
        match self.transport.send(request, self.primary_timeout) {
            Ok(envelope) => Ok(envelope),
            Err(TransportError::Timeout) => {
                warn!(
                    primary_secs = self.primary_timeout.as_secs(),
                    fallback_secs = self.fallback_timeout.as_secs(),
                    "Primary analysis attempt timed out; retrying with extended timeout"
                );
                match self.transport.send(request, self.fallback_timeout) {
                    Ok(envelope) => Ok(envelope),
                    Err(TransportError::Timeout) => Err(RemoteError::RequestTimeout),
                    Err(other) => Err(map_transport_error(other)),
                }
            }
            Err(other) => Err(map_transport_error(other)),
        }
    }
}

fn map_transport_error(error: TransportError) -> RemoteError {
    match error {
        // Escalation consumes Timeout before this point; a stray one is
        // still a timeout to the caller.
        TransportError::Timeout => RemoteError::RequestTimeout,
        TransportError::Connect(detail) => RemoteError::NetworkError(detail),
        TransportError::Other(detail) => RemoteError::NetworkError(detail),
        TransportError::Http { status, message } => RemoteError::AnalysisFailed {
            message: format!("HTTP {status}: {message}"),
        },
    }
}

// ═══════════════════════════════════════════════════════════
// Envelope decoding
// ═══════════════════════════════════════════════════════════

/// Interpret a decoded envelope into a result or a tagged error.
fn decode_envelope(envelope: AnalyzeResponse) -> Result<AnalysisResult, RemoteError> {
    if let Some(error) = envelope.error {
        return Err(match error.code.as_str() {
            "IMAGE_UNCLEAR" => RemoteError::ImageUnclear {
                message: error.message,
            },
            "NOT_FOOD" => RemoteError::NotFood {
                message: error.message,
            },
            "NO_FOOD_DETECTED" => RemoteError::NoFoodDetected,
            _ => RemoteError::AnalysisFailed {
                message: error.message,
            },
        });
    }

    if !envelope.success {
        return Err(RemoteError::AnalysisFailed {
            message: "analysis service reported failure without detail".into(),
        });
    }

    let data = envelope.data.ok_or_else(|| RemoteError::AnalysisFailed {
        message: "success envelope missing payload".into(),
    })?;

    let confidence = data.confidence.as_deref().map(parse_confidence_tag);
    match confidence {
        Some(Some(ConfidenceTag::Unclear)) => {
            return Err(RemoteError::ImageUnclear {
                message: "the model could not identify the foods".into(),
            })
        }
        Some(Some(ConfidenceTag::NotFood)) => {
            return Err(RemoteError::NotFood {
                message: "the model judged the image to contain no food".into(),
            })
        }
        _ => {}
    }

    let foods = data
        .foods
        .into_iter()
        .map(parse_food)
        .collect::<Result<Vec<_>, _>>()?;

    if foods.is_empty() {
        return Err(RemoteError::NoFoodDetected);
    }

    Ok(AnalysisResult::from_foods(
        foods,
        data.total_calories,
        confidence.flatten(),
        data.notes,
    ))
}

fn parse_confidence_tag(tag: &str) -> Option<ConfidenceTag> {
    match tag {
        "high" => Some(ConfidenceTag::High),
        "medium" => Some(ConfidenceTag::Medium),
        "low" => Some(ConfidenceTag::Low),
        "unclear" => Some(ConfidenceTag::Unclear),
        "not_food" => Some(ConfidenceTag::NotFood),
        other => {
            warn!(tag = other, "Unrecognized confidence tag from analysis service");
            None
        }
    }
}

fn parse_food(wire: WireFood) -> Result<FoodItem, RemoteError> {
    let item = FoodItem {
        name: wire.name,
        portion: wire.portion,
        ingredients: wire.ingredients,
        calories: wire.calories,
        nutrition: NutritionInfo {
            protein: wire.nutrition.protein,
            fat: wire.nutrition.fat,
            carbs: wire.nutrition.carbs,
            fiber: wire.nutrition.fiber,
        },
        bounding_box: wire.bounding_box,
        confidence: wire.confidence,
    };

    if !item.is_valid() {
        return Err(RemoteError::AnalysisFailed {
            message: format!("invalid food item \"{}\" in response", item.name),
        });
    }
    Ok(item)
}

// ═══════════════════════════════════════════════════════════
// MockTransport (testing)
// ═══════════════════════════════════════════════════════════


// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
