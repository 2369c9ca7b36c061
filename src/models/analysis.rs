use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::food::{total_calories, FoodItem};

/// Overall confidence tag reported by the vision model.
///
/// `Unclear` and `NotFood` are terminal conditions — the client maps them to
/// errors before an `AnalysisResult` ever reaches the caller, but cached or
/// stored results keep the tag for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTag {
    High,
    Medium,
    Low,
    Unclear,
    NotFood,
}

impl ConfidenceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unclear => "unclear",
            Self::NotFood => "not_food",
        }
    }
}

/// Terminal artifact of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Display copy of the upload, as a data URI.
    pub image_data_uri: String,
    pub foods: Vec<FoodItem>,
    pub total_calories: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceTag>,
    /// Free-text health notes from the vision model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AnalysisResult {
    /// Build a result from recognized items, summing calories when the
    /// model did not report a total.
    pub fn from_foods(
        foods: Vec<FoodItem>,
        reported_total: Option<f64>,
        confidence: Option<ConfidenceTag>,
        notes: Option<String>,
    ) -> Self {
        let total = reported_total.unwrap_or_else(|| total_calories(&foods));
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            image_data_uri: String::new(),
            foods,
            total_calories: total,
            confidence,
            notes,
        }
    }

    /// An empty food list is only legitimate under an unclear/not-food tag.
    pub fn is_consistent(&self) -> bool {
        if self.foods.is_empty() {
            matches!(
                self.confidence,
                Some(ConfidenceTag::Unclear) | Some(ConfidenceTag::NotFood)
            )
        } else {
            self.foods.iter().all(|f| f.is_valid())
                && self.total_calories.is_finite()
                && self.total_calories >= 0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::food::NutritionInfo;

    fn item(name: &str, calories: f64) -> FoodItem {
        FoodItem {
            name: name.into(),
            portion: None,
            ingredients: None,
            calories,
            nutrition: NutritionInfo {
                protein: 10.0,
                fat: 5.0,
                carbs: 30.0,
                fiber: 2.0,
            },
            bounding_box: None,
            confidence: None,
        }
    }

    #[test]
    fn missing_total_falls_back_to_item_sum() {
        let result = AnalysisResult::from_foods(
            vec![item("rice", 200.0), item("chicken", 300.0)],
            None,
            Some(ConfidenceTag::High),
            None,
        );
        assert_eq!(result.total_calories, 500.0);
    }

    #[test]
    fn reported_total_wins_over_item_sum() {
        let result = AnalysisResult::from_foods(
            vec![item("rice", 200.0)],
            Some(210.0),
            Some(ConfidenceTag::Medium),
            None,
        );
        assert_eq!(result.total_calories, 210.0);
    }

    #[test]
    fn empty_foods_require_unclear_or_not_food() {
        let unclear = AnalysisResult::from_foods(vec![], None, Some(ConfidenceTag::Unclear), None);
        assert!(unclear.is_consistent());

        let high = AnalysisResult::from_foods(vec![], None, Some(ConfidenceTag::High), None);
        assert!(!high.is_consistent());

        let untagged = AnalysisResult::from_foods(vec![], None, None, None);
        assert!(!untagged.is_consistent());
    }

    #[test]
    fn confidence_tag_serializes_snake_case() {
        let json = serde_json::to_string(&ConfidenceTag::NotFood).unwrap();
        assert_eq!(json, "\"not_food\"");
        let parsed: ConfidenceTag = serde_json::from_str("\"unclear\"").unwrap();
        assert_eq!(parsed, ConfidenceTag::Unclear);
    }

    #[test]
    fn result_round_trips_through_json() {
        let result = AnalysisResult::from_foods(
            vec![item("noodles", 420.0)],
            None,
            Some(ConfidenceTag::High),
            Some("Consider adding vegetables.".into()),
        );
        let json = serde_json::to_string(&result).unwrap();
        let back: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
