//! Local food pre-screen: classify the upload on-device and decide whether
//! it is worth a remote analysis call.
//!
//! The classifier is a generic image labeler (MobileNet-class, ImageNet
//! labels), so "is this food" is derived by keyword-matching its top labels
//! against a food-domain vocabulary and thresholding the matched and
//! unmatched confidence maxima separately.
//!
//! Infrastructure failures never block: a broken or missing classifier
//! yields a pass-through verdict and the remote model decides.

use thiserror::Error;
use tracing::warn;

// ═══════════════════════════════════════════════════════════
// Thresholds
// ═══════════════════════════════════════════════════════════

/// Matched-label confidence at or above this passes the gate outright.
/// Shared with the orchestrator's cache-trust check — the two are coupled
/// by design.
pub const FOOD_CONFIDENCE_PASS: f32 = 0.25;

/// Unmatched-label confidence at or above this flags the image as
/// probably-not-food (warn-or-block).
pub const NON_FOOD_CONFIDENCE_BLOCK: f32 = 0.60;

/// How many ranked labels the gate inspects.
const TOP_K: usize = 3;

// ═══════════════════════════════════════════════════════════
// Classifier contract
// ═══════════════════════════════════════════════════════════

/// One ranked label from the on-device classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
}

/// Errors from classifier infrastructure (never surfaced past the gate).
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Classifier load failed: {0}")]
    Load(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// On-device image classifier: encoded image bytes in, ranked labels out
/// (descending probability).
pub trait Classifier: Send + Sync {
    fn classify(&self, image_bytes: &[u8], top_k: usize)
        -> Result<Vec<Prediction>, ClassifierError>;
}

// ═══════════════════════════════════════════════════════════
// Food vocabulary
// ═══════════════════════════════════════════════════════════

/// Food-domain substrings: dishes, ingredients, meal occasions, venues.
/// A label counts as food when it contains one of these terms or is
/// contained by one, case-insensitively.
const FOOD_KEYWORDS: &[&str] = &[
    // generic
    "food", "dish", "meal", "plate", "bowl", "cup", "platter", "tray",
    // dishes
    "pizza", "burger", "cheeseburger", "hotdog", "hot dog", "sandwich", "salad", "soup",
    "stew", "curry", "carbonara", "spaghetti", "pasta", "noodle", "ramen", "sushi",
    "burrito", "taco", "guacamole", "omelette", "meatloaf", "potpie", "pot pie",
    "dumpling", "pancake", "waffle", "pretzel", "bagel", "french loaf", "pilaf", "paella",
    // baked & sweet
    "bread", "toast", "cake", "cookie", "pie", "muffin", "doughnut", "donut", "trifle",
    "pudding", "dessert", "chocolate", "candy", "ice cream", "icecream", "sorbet",
    // ingredients & produce
    "fruit", "vegetable", "meat", "steak", "chicken", "fish", "salmon", "shrimp",
    "lobster", "crab", "egg", "cheese", "yogurt", "butter", "rice", "corn", "potato",
    "mashed potato", "french fries", "fries", "mushroom", "broccoli", "cauliflower",
    "cucumber", "zucchini", "pepper", "tomato", "pumpkin", "squash", "avocado",
    "banana", "apple", "orange", "strawberry", "lemon", "lime", "pineapple",
    "pomegranate", "fig", "grape", "melon", "peach", "mango",
    // meal occasions
    "breakfast", "lunch", "dinner", "brunch", "snack", "appetizer",
    // drinks
    "drink", "beverage", "coffee", "espresso", "tea", "juice", "smoothie",
    "milkshake", "milk", "cocoa",
    // venues & activities
    "restaurant", "dining", "cuisine", "cooking", "bakery", "grocery", "delicatessen",
];

/// Case-insensitive two-way containment against the food vocabulary.
pub fn is_food_label(label: &str) -> bool {
    let label = label.to_lowercase();
    FOOD_KEYWORDS
        .iter()
        .any(|keyword| label.contains(keyword) || keyword.contains(label.as_str()))
}

/// Human-friendly rendering of an ImageNet-style label: first synonym
/// segment, underscores flattened.
pub fn friendly_label(label: &str) -> String {
    let first = label.split(',').next().unwrap_or(label).trim();
    first.replace('_', " ")
}

// ═══════════════════════════════════════════════════════════
// Verdict
// ═══════════════════════════════════════════════════════════

/// Structured judgment of the gate for one upload.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub is_food: bool,
    /// Max probability among food-matched labels.
    pub food_confidence: f32,
    /// Max probability among unmatched labels.
    pub non_food_confidence: f32,
    pub should_warn: bool,
    pub reason: String,
    /// The ranked labels the judgment was derived from (top-3).
    pub predictions: Vec<Prediction>,
}

impl Verdict {
    /// The gate wants this image stopped (pending the override check).
    pub fn is_blockable(&self) -> bool {
        !self.is_food && self.should_warn
    }

    /// Local confidence is high enough to trust the result cache.
    pub fn trusts_cache(&self) -> bool {
        self.food_confidence >= FOOD_CONFIDENCE_PASS
    }

    /// Highest-ranked prediction, if any.
    pub fn top_prediction(&self) -> Option<&Prediction> {
        self.predictions.first()
    }

    /// Pass-through verdict used when classifier infrastructure fails.
    pub fn fail_open(detail: &str) -> Self {
        Self {
            is_food: true,
            food_confidence: 0.0,
            non_food_confidence: 0.0,
            should_warn: false,
            reason: format!("classifier unavailable ({detail}); deferring to remote analysis"),
            predictions: Vec::new(),
        }
    }
}

/// Derive the verdict from ranked predictions.
///
/// Policy, in order:
/// 1. food confidence >= 0.25 -> pass
/// 2. non-food confidence >= 0.60 -> warn-or-block
/// 3. otherwise -> pass, undetermined; the remote model decides
pub fn evaluate(mut predictions: Vec<Prediction>) -> Verdict {
    predictions.truncate(TOP_K);

    let mut food_confidence = 0.0f32;
    let mut non_food_confidence = 0.0f32;
    for p in &predictions {
        if is_food_label(&p.label) {
            food_confidence = food_confidence.max(p.probability);
        } else {
            non_food_confidence = non_food_confidence.max(p.probability);
        }
    }

    if food_confidence >= FOOD_CONFIDENCE_PASS {
        return Verdict {
            is_food: true,
            food_confidence,
            non_food_confidence,
            should_warn: false,
            reason: format!("food label matched at {:.0}%", food_confidence * 100.0),
            predictions,
        };
    }

    if non_food_confidence >= NON_FOOD_CONFIDENCE_BLOCK {
        let top = predictions
            .first()
            .map(|p| friendly_label(&p.label))
            .unwrap_or_else(|| "unknown".into());
        return Verdict {
            is_food: false,
            food_confidence,
            non_food_confidence,
            should_warn: true,
            reason: format!(
                "non-food label \"{top}\" at {:.0}%",
                non_food_confidence * 100.0
            ),
            predictions,
        };
    }

    Verdict {
        is_food: true,
        food_confidence,
        non_food_confidence,
        should_warn: false,
        reason: "undetermined, deferring to remote analysis".into(),
        predictions,
    }
}

/// Classify and judge, swallowing classifier failures into a pass.
pub fn screen(classifier: &dyn Classifier, image_bytes: &[u8]) -> Verdict {
    match classifier.classify(image_bytes, TOP_K) {
        Ok(predictions) => evaluate(predictions),
        Err(e) => {
            warn!(error = %e, "Local classifier failed; passing image through");
            Verdict::fail_open(&e.to_string())
        }
    }
}

// ═══════════════════════════════════════════════════════════
// MockClassifier (testing)
// ═══════════════════════════════════════════════════════════

/// Test classifier returning scripted predictions or a scripted failure.
pub struct MockClassifier {
    predictions: Vec<Prediction>,
    fail: bool,
}

impl MockClassifier {
    pub fn with_predictions(predictions: Vec<(&str, f32)>) -> Self {
        Self {
            predictions: predictions
                .into_iter()
                .map(|(label, probability)| Prediction {
                    label: label.into(),
                    probability,
                })
                .collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            predictions: Vec::new(),
            fail: true,
        }
    }
}

impl Classifier for MockClassifier {
    fn classify(
        &self,
        _image_bytes: &[u8],
        top_k: usize,
    ) -> Result<Vec<Prediction>, ClassifierError> {
        if self.fail {
            return Err(ClassifierError::Inference("mock failure".into()));
        }
        Ok(self.predictions.iter().take(top_k).cloned().collect())
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn preds(list: &[(&str, f32)]) -> Vec<Prediction> {
        list.iter()
            .map(|(label, probability)| Prediction {
                label: (*label).into(),
                probability: *probability,
            })
            .collect()
    }

    // ── keyword matching ────────────────────────────────

    #[test]
    fn direct_keyword_matches() {
        assert!(is_food_label("pizza"));
        assert!(is_food_label("cheeseburger"));
        assert!(is_food_label("ice cream"));
    }

    #[test]
    fn label_containing_keyword_matches() {
        assert!(is_food_label("pepperoni pizza, pizza pie"));
        assert!(is_food_label("soup bowl"));
    }

    #[test]
    fn keyword_containing_label_matches() {
        // "fries" keyword contains the label "frie"? no — but
        // "mashed potato" contains the short label "potato"
        assert!(is_food_label("potato"));
        assert!(is_food_label("dog")); // contained by "hot dog"
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(is_food_label("Pizza"));
        assert!(is_food_label("ESPRESSO"));
    }

    #[test]
    fn non_food_labels_do_not_match() {
        assert!(!is_food_label("laptop, laptop computer"));
        assert!(!is_food_label("sports car"));
        assert!(!is_food_label("mountain bike"));
    }

    #[test]
    fn friendly_label_takes_first_synonym() {
        assert_eq!(friendly_label("laptop, laptop computer"), "laptop");
        assert_eq!(friendly_label("hot_dog, red_hot"), "hot dog");
        assert_eq!(friendly_label("pizza"), "pizza");
    }

    // ── threshold boundaries ────────────────────────────

    #[test]
    fn food_confidence_exactly_at_pass_threshold_passes() {
        // Pass wins even against a blockable non-food confidence:
        // the food threshold is evaluated first.
        let v = evaluate(preds(&[("pizza", 0.25), ("desk", 0.6)]));
        assert!(v.is_food);
        assert!(!v.should_warn);
    }

    #[test]
    fn food_confidence_just_below_with_high_non_food_blocks() {
        let v = evaluate(preds(&[("laptop", 0.6), ("pizza", 0.249999)]));
        assert!(!v.is_food);
        assert!(v.should_warn);
        assert!(v.is_blockable());
    }

    #[test]
    fn non_food_exactly_at_block_threshold_blocks() {
        let v = evaluate(preds(&[("laptop", 0.60), ("screen", 0.2)]));
        assert!(v.is_blockable());
        assert!((v.non_food_confidence - 0.60).abs() < f32::EPSILON);
    }

    #[test]
    fn non_food_just_below_threshold_passes_undetermined() {
        let v = evaluate(preds(&[("laptop", 0.5999), ("screen", 0.2)]));
        assert!(v.is_food);
        assert!(!v.should_warn);
        assert_eq!(v.food_confidence, 0.0);
        assert!(v.reason.contains("undetermined"));
    }

    // ── partitioning ────────────────────────────────────

    #[test]
    fn confidences_are_partition_maxima() {
        let v = evaluate(preds(&[
            ("pizza", 0.5),
            ("plate", 0.3),
            ("laptop", 0.15),
        ]));
        assert!((v.food_confidence - 0.5).abs() < f32::EPSILON);
        assert!((v.non_food_confidence - 0.15).abs() < f32::EPSILON);
    }

    #[test]
    fn only_top_three_predictions_considered() {
        // Food label ranked 4th must not rescue the image
        let v = evaluate(preds(&[
            ("laptop", 0.7),
            ("screen", 0.1),
            ("keyboard", 0.1),
            ("pizza", 0.9),
        ]));
        assert!(v.is_blockable());
        assert_eq!(v.predictions.len(), 3);
    }

    #[test]
    fn empty_predictions_pass_undetermined() {
        let v = evaluate(vec![]);
        assert!(v.is_food);
        assert_eq!(v.food_confidence, 0.0);
        assert!(!v.trusts_cache());
    }

    // ── cache trust ─────────────────────────────────────

    #[test]
    fn cache_trust_follows_pass_threshold() {
        assert!(evaluate(preds(&[("pizza", 0.25)])).trusts_cache());
        assert!(!evaluate(preds(&[("pizza", 0.24)])).trusts_cache());
    }

    // ── fail-open ───────────────────────────────────────

    #[test]
    fn classifier_failure_passes_through() {
        let classifier = MockClassifier::failing();
        let v = screen(&classifier, b"bytes");
        assert!(v.is_food);
        assert_eq!(v.food_confidence, 0.0);
        assert!(!v.should_warn);
        assert!(!v.trusts_cache());
        assert!(v.predictions.is_empty());
    }

    #[test]
    fn screen_delegates_to_evaluate() {
        let classifier =
            MockClassifier::with_predictions(vec![("pizza", 0.7), ("plate", 0.2)]);
        let v = screen(&classifier, b"bytes");
        assert!(v.is_food);
        assert!((v.food_confidence - 0.7).abs() < f32::EPSILON);
    }
}
