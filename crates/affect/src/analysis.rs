//! Per-frame and per-request analysis results

use serde::{Deserialize, Serialize};

use crate::detector::FaceBbox;
use crate::emotion::{Emotion, StressClass};
use crate::stress::{stress_level, StressLabel, StressScore};

/// Geometry of one face in a streamed frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceMetrics {
    pub face: FaceBbox,

    /// Mean EAR of both eyes (None when the eye contour is degenerate)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eye_aspect_ratio: Option<f64>,

    /// Vertical span of points 17..22
    pub left_eyebrow_metric: f64,

    /// Vertical span of points 22..27
    pub right_eyebrow_metric: f64,
}

/// Streaming result for one frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub sequence: u32,
    pub timestamp_ns: u64,

    /// Whether a face was detected
    pub face_detected: bool,

    /// Blinks counted since the session started
    pub total_blinks: u64,

    /// A blink ended on this frame
    pub blink_completed: bool,

    /// Eyebrow metrics of the primary face
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_eyebrow_metric: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_eyebrow_metric: Option<f64>,

    /// Every scored face, in detection order
    pub faces: Vec<FaceMetrics>,
}

impl FrameAnalysis {
    /// Overlay lines as drawn by the preview renderer
    pub fn overlay_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Blinks: {}", self.total_blinks)];
        if let (Some(left), Some(right)) = (self.left_eyebrow_metric, self.right_eyebrow_metric) {
            lines.push(format!("Left Eyebrow: {:.2}", left));
            lines.push(format!("Right Eyebrow: {:.2}", right));
        }
        lines
    }
}

/// Model outputs for one face of an uploaded image, before scoring
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub face: FaceBbox,
    /// None when classification failed for this face
    pub emotion: Option<Emotion>,
    /// None when landmark prediction failed for this face
    pub inter_brow_distance: Option<f64>,
}

/// Scored result for one face of an uploaded image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceStress {
    pub face: FaceBbox,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion_label: Option<StressClass>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eyebrow_distance: Option<f64>,

    pub stress_value: f64,
    pub stress_level: u8,
    pub stress_label: StressLabel,
}

impl FaceStress {
    pub fn scored(observation: &FaceObservation, score: &StressScore) -> Self {
        Self {
            face: observation.face.clone(),
            emotion: observation.emotion,
            emotion_label: observation.emotion.map(|e| e.stress_class()),
            eyebrow_distance: Some(score.distance),
            stress_value: score.stress_value,
            stress_level: score.stress_level(),
            stress_label: score.label,
        }
    }

    /// Sentinel for a face that could not be scored
    pub fn undetermined(observation: &FaceObservation) -> Self {
        Self {
            face: observation.face.clone(),
            emotion: observation.emotion,
            emotion_label: observation.emotion.map(|e| e.stress_class()),
            eyebrow_distance: observation.inter_brow_distance,
            stress_value: 0.0,
            stress_level: 0,
            stress_label: StressLabel::Undetermined,
        }
    }
}

/// Request-mode result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressReport {
    /// `trunc(stress_value * 100)` of the summary face, as a string
    pub stress_level: String,
    pub stress_label: StressLabel,
    /// Emotion-derived class of the summary face
    pub emotion_label: Option<StressClass>,
    pub faces: Vec<FaceStress>,
}

impl StressReport {
    /// Sentinel when no face was found
    pub fn no_face() -> Self {
        Self {
            stress_level: "0".to_string(),
            stress_label: StressLabel::NoFace,
            emotion_label: None,
            faces: Vec::new(),
        }
    }

    /// Summarize with the last face, as the scored faces are in processing order
    pub fn from_faces(faces: Vec<FaceStress>) -> Self {
        let Some(summary) = faces.last() else {
            return Self::no_face();
        };
        let (level, label, emotion_label) = (
            stress_level(summary.stress_value),
            summary.stress_label,
            summary.emotion_label,
        );
        Self {
            stress_level: level.to_string(),
            stress_label: label,
            emotion_label,
            faces,
        }
    }
}
