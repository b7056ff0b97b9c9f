use serde::{Deserialize, Serialize};

/// Confidence level attached to signals and proposals
///
/// Variants are ordered, so `Confidence::High > Confidence::Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    /// Numeric score in [0.2, 1.0]
    pub fn score(&self) -> f64 {
        match self {
            Confidence::VeryLow => 0.2,
            Confidence::Low => 0.4,
            Confidence::Medium => 0.6,
            Confidence::High => 0.8,
            Confidence::VeryHigh => 1.0,
        }
    }

    /// Map a score in [0, 1] back to the nearest level at or below it
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Confidence::VeryHigh
        } else if score >= 0.7 {
            Confidence::High
        } else if score >= 0.5 {
            Confidence::Medium
        } else if score >= 0.3 {
            Confidence::Low
        } else {
            Confidence::VeryLow
        }
    }
}
