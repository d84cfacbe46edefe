//! Affect pipeline configuration

use frame_source::{ClaheConfig, FrameLimits, DEFAULT_PROCESSING_WIDTH};
use inference_engine::InputLayout;
use serde::{Deserialize, Serialize};

use crate::detector::FaceBbox;
use crate::stress::StressLabelRule;
use crate::AffectError;

/// Blink state machine thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// EAR below this value counts as a closed-eye frame
    pub ear_threshold: f64,
    /// Closed-eye frames needed before reopening counts as a blink
    pub min_consecutive_frames: u32,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.3,
            min_consecutive_frames: 5,
        }
    }
}

/// Stress scoring policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// How a stress value maps to High/Low Stress
    pub label_rule: StressLabelRule,
    /// Keep only the last N distance observations (None = unbounded)
    pub history_window: Option<usize>,
    /// Store observations truncated to whole numbers
    pub truncate_observations: bool,
}

/// Which detected faces are scored when a frame holds several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Score every face in detection order; summary fields come from the last one
    #[default]
    All,
    /// Only the first detected face
    First,
    /// Only the face with the largest box
    Largest,
}

impl AggregationPolicy {
    /// Apply the policy to detector output
    pub fn select(self, faces: Vec<FaceBbox>) -> Vec<FaceBbox> {
        match self {
            AggregationPolicy::All => faces,
            AggregationPolicy::First => faces.into_iter().take(1).collect(),
            AggregationPolicy::Largest => {
                let mut largest: Option<FaceBbox> = None;
                for face in faces {
                    if largest.as_ref().map_or(true, |l| face.area() > l.area()) {
                        largest = Some(face);
                    }
                }
                largest.into_iter().collect()
            }
        }
    }
}

/// Model locations and input geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub face_model_path: Option<String>,
    pub landmark_model_path: Option<String>,
    pub emotion_model_path: Option<String>,

    /// Square input side of the face detector
    pub detector_input_size: u32,
    /// Square input side of the landmark regressor
    pub landmark_input_size: u32,
    /// Emotion classifier input layout
    pub emotion_input: InputLayout,

    /// Face detection confidence threshold
    pub face_confidence: f32,

    /// Fall back to mock models when a path is missing
    pub allow_mock: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            face_model_path: None,
            landmark_model_path: None,
            emotion_model_path: None,
            detector_input_size: 320,
            landmark_input_size: 112,
            emotion_input: InputLayout::default(),
            face_confidence: 0.7,
            allow_mock: false,
        }
    }
}

/// Affect pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectConfig {
    /// Width frames and uploads are resized to before detection
    pub processing_width: u32,
    /// Inputs over these bounds are rejected before decoding or resizing
    pub limits: FrameLimits,
    /// Contrast enhancement of streamed frames before detection
    pub contrast: ClaheConfig,
    pub blink: BlinkConfig,
    pub stress: StressConfig,
    pub aggregation: AggregationPolicy,
    pub models: ModelConfig,
}

impl Default for AffectConfig {
    fn default() -> Self {
        Self {
            processing_width: DEFAULT_PROCESSING_WIDTH,
            limits: FrameLimits::default(),
            contrast: ClaheConfig::default(),
            blink: BlinkConfig::default(),
            stress: StressConfig::default(),
            aggregation: AggregationPolicy::default(),
            models: ModelConfig::default(),
        }
    }
}

/// Named starting points for [`AffectConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePreset {
    #[default]
    Legacy,
    Corrected,
}

impl PipelinePreset {
    pub fn config(self) -> AffectConfig {
        match self {
            PipelinePreset::Legacy => AffectConfig::legacy(),
            PipelinePreset::Corrected => AffectConfig::corrected(),
        }
    }
}

impl AffectConfig {
    /// Default behaviour: unbounded history, literal label rule, all faces
    pub fn legacy() -> Self {
        Self::default()
    }

    /// Corrected behaviour: percent label rule, sliding window, largest face
    pub fn corrected() -> Self {
        Self {
            stress: StressConfig {
                label_rule: StressLabelRule::Percent { threshold: 50.0 },
                history_window: Some(300),
                truncate_observations: false,
            },
            aggregation: AggregationPolicy::Largest,
            ..Default::default()
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), AffectError> {
        if self.processing_width == 0 {
            return Err(AffectError::Config("processing_width must be positive".into()));
        }
        if self.limits.max_dimension == 0 || self.limits.max_pixels < self.processing_width as u64 {
            return Err(AffectError::Config(format!(
                "limits must admit at least one {}-pixel row",
                self.processing_width
            )));
        }
        if !(self.contrast.clip_limit.is_finite() && self.contrast.clip_limit >= 0.0) {
            return Err(AffectError::Config("contrast clip_limit must be a non-negative number".into()));
        }
        if self.contrast.tile_grid == 0 {
            return Err(AffectError::Config("contrast tile_grid must be at least 1".into()));
        }
        if !(self.blink.ear_threshold.is_finite() && self.blink.ear_threshold > 0.0) {
            return Err(AffectError::Config(format!(
                "ear_threshold must be a positive number, got {}",
                self.blink.ear_threshold
            )));
        }
        if self.blink.min_consecutive_frames == 0 {
            return Err(AffectError::Config("min_consecutive_frames must be at least 1".into()));
        }
        if self.stress.history_window == Some(0) {
            return Err(AffectError::Config("history_window must be at least 1".into()));
        }
        if let StressLabelRule::Percent { threshold } = self.stress.label_rule {
            if !threshold.is_finite() {
                return Err(AffectError::Config("percent threshold must be finite".into()));
            }
        }
        if self.models.detector_input_size == 0 || self.models.landmark_input_size == 0 {
            return Err(AffectError::Config("model input sizes must be positive".into()));
        }
        if self.models.emotion_input.is_empty() {
            return Err(AffectError::Config("emotion input layout is empty".into()));
        }
        Ok(())
    }
}
