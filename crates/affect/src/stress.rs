//! Stress scoring from the inter-eyebrow distance history
//!
//! Each observation is appended to a [`DistanceHistory`], normalized against
//! the history's min/max range and decayed exponentially:
//!
//! ```text
//! normalized   = |d - min| / |max - min|
//! stress_value = exp(-normalized)          in (0, 1]
//! ```

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::StressConfig;
use crate::AffectError;

/// Threshold of the literal label rule, compared against `stress_value`
pub const HIGH_STRESS_THRESHOLD: f64 = 50.0;

/// Geometric stress label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StressLabel {
    #[serde(rename = "High Stress")]
    HighStress,
    #[serde(rename = "Low Stress")]
    LowStress,
    /// History range was zero, no score could be computed
    #[serde(rename = "Undetermined")]
    Undetermined,
    #[serde(rename = "Cannot identify face")]
    NoFace,
}

impl StressLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StressLabel::HighStress => "High Stress",
            StressLabel::LowStress => "Low Stress",
            StressLabel::Undetermined => "Undetermined",
            StressLabel::NoFace => "Cannot identify face",
        }
    }
}

/// Rule turning a stress value into a label
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StressLabelRule {
    /// `stress_value >= 50`. Since `stress_value <= 1` this never fires and
    /// every score is labelled Low Stress.
    #[default]
    Literal,
    /// `stress_value * 100 >= threshold`
    Percent { threshold: f64 },
}

impl StressLabelRule {
    pub fn label(&self, stress_value: f64) -> StressLabel {
        let high = match self {
            StressLabelRule::Literal => stress_value >= HIGH_STRESS_THRESHOLD,
            StressLabelRule::Percent { threshold } => stress_value * 100.0 >= *threshold,
        };
        if high {
            StressLabel::HighStress
        } else {
            StressLabel::LowStress
        }
    }
}

/// One scored observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressScore {
    pub distance: f64,
    pub normalized: f64,
    pub stress_value: f64,
    pub label: StressLabel,
}

impl StressScore {
    /// `stress_value * 100` truncated toward zero
    pub fn stress_level(&self) -> u8 {
        stress_level(self.stress_value)
    }
}

/// Percentage form of a stress value, truncated toward zero
pub fn stress_level(stress_value: f64) -> u8 {
    (stress_value * 100.0).trunc().clamp(0.0, 100.0) as u8
}

/// Min-max normalization of `observation`.
///
/// A zero (or non-finite) range yields [`AffectError::DegenerateHistory`].
pub fn normalize(observation: f64, min: f64, max: f64) -> Result<f64, AffectError> {
    let range = (max - min).abs();
    if range == 0.0 || !range.is_finite() {
        return Err(AffectError::DegenerateHistory);
    }
    Ok((observation - min).abs() / range)
}

/// Ordered inter-eyebrow distance observations for one scoring scope
#[derive(Debug, Clone, Default)]
pub struct DistanceHistory {
    observations: VecDeque<f64>,
    /// Maximum retained observations (None = unbounded)
    window: Option<usize>,
    truncate: bool,
}

impl DistanceHistory {
    /// Unbounded history storing exact observations
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &StressConfig) -> Self {
        Self {
            observations: VecDeque::new(),
            window: config.history_window,
            truncate: config.truncate_observations,
        }
    }

    /// Append an observation, evicting the oldest when the window is full
    pub fn push(&mut self, distance: f64) {
        let stored = if self.truncate { distance.trunc() } else { distance };
        self.observations.push_back(stored);

        if let Some(window) = self.window {
            while self.observations.len() > window.max(1) {
                self.observations.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn min(&self) -> Option<f64> {
        self.observations.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.observations.iter().copied().reduce(f64::max)
    }

    pub fn observations(&self) -> impl Iterator<Item = f64> + '_ {
        self.observations.iter().copied()
    }

    /// Append `distance` and score it against the updated history
    pub fn score(&mut self, distance: f64, rule: StressLabelRule) -> Result<StressScore, AffectError> {
        self.push(distance);

        let (min, max) = match (self.min(), self.max()) {
            (Some(min), Some(max)) => (min, max),
            _ => return Err(AffectError::DegenerateHistory),
        };

        let normalized = normalize(distance, min, max)?;
        let stress_value = (-normalized).exp();

        Ok(StressScore {
            distance,
            normalized,
            stress_value,
            label: rule.label(stress_value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn history_of(values: &[f64]) -> DistanceHistory {
        let mut history = DistanceHistory::new();
        for &v in values {
            history.push(v);
        }
        history
    }

    #[test]
    fn test_normalized_score() {
        let mut history = history_of(&[10.0, 20.0, 30.0]);
        let score = history.score(20.0, StressLabelRule::Literal).unwrap();

        assert!((score.normalized - 0.5).abs() < 1e-12);
        assert!((score.stress_value - 0.6065).abs() < 1e-4);
        assert_eq!(score.label, StressLabel::LowStress);
        assert_eq!(score.stress_level(), 60);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_single_entry_history_is_degenerate() {
        let mut history = history_of(&[15.0]);
        let err = history.score(15.0, StressLabelRule::Literal).unwrap_err();
        assert!(matches!(err, AffectError::DegenerateHistory));
    }

    #[test]
    fn test_first_observation_is_degenerate() {
        let mut history = DistanceHistory::new();
        assert!(matches!(
            history.score(42.0, StressLabelRule::Literal),
            Err(AffectError::DegenerateHistory)
        ));
        // The observation is still recorded
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_literal_rule_never_reports_high_stress() {
        // stress_value is at most 1, so `>= 50` never holds
        let rule = StressLabelRule::Literal;
        assert_eq!(rule.label(1.0), StressLabel::LowStress);
        assert_eq!(rule.label(f64::MIN_POSITIVE), StressLabel::LowStress);

        let mut history = history_of(&[10.0, 30.0]);
        let score = history.score(10.0, rule).unwrap();
        assert_eq!(score.stress_value, 1.0);
        assert_eq!(score.label, StressLabel::LowStress);
    }

    #[test]
    fn test_percent_rule() {
        let rule = StressLabelRule::Percent { threshold: 50.0 };
        assert_eq!(rule.label(1.0), StressLabel::HighStress);
        assert_eq!(rule.label(0.5), StressLabel::HighStress);
        assert_eq!(rule.label(0.49), StressLabel::LowStress);
    }

    #[test]
    fn test_sliding_window() {
        let mut history = DistanceHistory::with_config(&StressConfig {
            history_window: Some(2),
            ..Default::default()
        });
        history.push(10.0);
        history.push(30.0);

        let score = history.score(20.0, StressLabelRule::Literal).unwrap();
        // 10 was evicted: range is [20, 30]
        assert_eq!(history.observations().collect::<Vec<_>>(), vec![30.0, 20.0]);
        assert_eq!(score.normalized, 0.0);
        assert_eq!(score.stress_value, 1.0);
    }

    #[test]
    fn test_truncated_observations() {
        let mut history = DistanceHistory::with_config(&StressConfig {
            truncate_observations: true,
            ..Default::default()
        });
        history.push(10.9);
        let score = history.score(20.7, StressLabelRule::Literal).unwrap();

        assert_eq!(history.observations().collect::<Vec<_>>(), vec![10.0, 20.0]);
        // The raw observation is normalized against the truncated range
        assert!((score.normalized - 10.7 / 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_stress_level_truncates() {
        assert_eq!(stress_level(0.999), 99);
        assert_eq!(stress_level(1.0), 100);
        assert_eq!(stress_level(0.0), 0);
    }

    #[test]
    fn test_label_serialization() {
        assert_eq!(serde_json::to_string(&StressLabel::NoFace).unwrap(), "\"Cannot identify face\"");
        let rule: StressLabelRule =
            serde_json::from_str(r#"{"kind":"percent","threshold":40.0}"#).unwrap();
        assert_eq!(rule, StressLabelRule::Percent { threshold: 40.0 });
    }

    proptest! {
        #[test]
        fn stress_value_is_bounded(values in proptest::collection::vec(0.0f64..500.0, 2..50), d in 0.0f64..500.0) {
            let mut history = history_of(&values);
            match history.score(d, StressLabelRule::Literal) {
                Ok(score) => {
                    prop_assert!(score.stress_value > 0.0 && score.stress_value <= 1.0);
                    prop_assert!(score.normalized.is_finite());
                    prop_assert_eq!(score.label, StressLabel::LowStress);
                }
                Err(AffectError::DegenerateHistory) => {
                    prop_assert_eq!(history.min(), history.max());
                }
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }
        }
    }
}
