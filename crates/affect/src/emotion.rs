//! Emotion labels and their stress collapse

use serde::{Deserialize, Serialize};

use crate::AffectError;

/// Emotion classes in classifier output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Scared,
    Happy,
    Sad,
    Surprised,
    Neutral,
}

impl Emotion {
    /// All classes, indexed like the classifier scores
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Scared,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprised,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Scared => "scared",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprised => "surprised",
            Emotion::Neutral => "neutral",
        }
    }

    /// Collapse to the binary stress class: scared and sad are stressed
    pub fn stress_class(&self) -> StressClass {
        match self {
            Emotion::Scared | Emotion::Sad => StressClass::Stressed,
            _ => StressClass::NotStressed,
        }
    }
}

/// Emotion-derived stress class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StressClass {
    #[serde(rename = "stressed")]
    Stressed,
    #[serde(rename = "not stressed")]
    NotStressed,
}

impl StressClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StressClass::Stressed => "stressed",
            StressClass::NotStressed => "not stressed",
        }
    }
}

/// Per-class classifier scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionScores(pub [f32; 7]);

impl EmotionScores {
    /// Build from a raw model output, which must hold exactly 7 scores
    pub fn from_slice(scores: &[f32]) -> Result<Self, AffectError> {
        let array: [f32; 7] = scores.try_into().map_err(|_| {
            AffectError::Inference(format!("expected 7 emotion scores, got {}", scores.len()))
        })?;
        Ok(Self(array))
    }

    /// Highest-scoring class (first wins on ties, NaN scores ignored)
    pub fn top(&self) -> Emotion {
        let mut best = 0;
        for (idx, &score) in self.0.iter().enumerate() {
            if score > self.0[best] || self.0[best].is_nan() {
                best = idx;
            }
        }
        Emotion::ALL[best]
    }
}
