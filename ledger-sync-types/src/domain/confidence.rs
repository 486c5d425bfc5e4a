//! Categorization confidence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A categorization certainty in `[0.0, 1.0]`.
///
/// Out-of-range input is clamped, never rejected. `NaN` becomes `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct ConfidenceScore(f64);

/// Named bands of a [`ConfidenceScore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceScore {
    pub const HIGH: f64 = 0.8;
    pub const MEDIUM: f64 = 0.5;

    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn level(&self) -> ConfidenceLevel {
        if self.0 >= Self::HIGH {
            ConfidenceLevel::High
        } else if self.0 >= Self::MEDIUM {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn is_high(&self) -> bool {
        self.level() == ConfidenceLevel::High
    }

    /// Arithmetic mean of the given scores, or `None` for an empty input.
    pub fn average<I>(scores: I) -> Option<Self>
    where
        I: IntoIterator<Item = ConfidenceScore>,
    {
        let (sum, count) = scores
            .into_iter()
            .fold((0.0_f64, 0_usize), |(sum, count), s| (sum + s.0, count + 1));
        if count == 0 {
            return None;
        }
        Some(Self::new(sum / count as f64))
    }
}

impl From<f64> for ConfidenceScore {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<ConfidenceScore> for f64 {
    fn from(score: ConfidenceScore) -> Self {
        score.0
    }
}

impl fmt::Display for ConfidenceScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}%", self.0 * 100.0)
    }
}
