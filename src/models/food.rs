use serde::{Deserialize, Serialize};

/// Macro-nutrient breakdown for one food item, in grams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionInfo {
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
    pub fiber: f64,
}

impl NutritionInfo {
    /// All macro fields are finite and non-negative.
    pub fn is_valid(&self) -> bool {
        [self.protein, self.fat, self.carbs, self.fiber]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Pixel-space region of a recognized item (multi-food recognition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One recognized food item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub name: String,
    /// Portion description, e.g. "1 slice (~120 g)".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portion: Option<String>,
    /// Visible ingredients, free text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<String>,
    pub calories: f64,
    pub nutrition: NutritionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    /// Per-item recognition confidence from the vision model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl FoodItem {
    /// Item has a name, a finite non-negative calorie count, and valid macros.
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty()
            && self.calories.is_finite()
            && self.calories >= 0.0
            && self.nutrition.is_valid()
    }
}

/// Sum of per-item calorie counts.
pub fn total_calories(foods: &[FoodItem]) -> f64 {
    foods.iter().map(|f| f.calories).sum()
}
