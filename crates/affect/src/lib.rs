//! Affect Signal Extraction
//!
//! Derives affect signals from facial landmarks and an emotion classifier:
//! - Blink counting from the eye aspect ratio (streaming mode)
//! - Eyebrow span metrics per frame
//! - Stress scoring from the normalized inter-eyebrow distance (request mode)
//! - Emotion-derived stress class

pub mod analysis;
pub mod analyzer;
pub mod config;
pub mod detector;
pub mod emotion;
pub mod state;
pub mod stream;
pub mod stress;

pub use analysis::{FaceMetrics, FaceObservation, FaceStress, FrameAnalysis, StressReport};
pub use analyzer::StressAnalyzer;
pub use config::{AffectConfig, AggregationPolicy, BlinkConfig, ModelConfig, PipelinePreset, StressConfig};
pub use detector::{
    EmotionClassifier, FaceBbox, FaceDetector, LandmarkPredictor, MockEmotionClassifier,
    MockFaceDetector, MockLandmarkPredictor, Models,
};
pub use emotion::{Emotion, EmotionScores, StressClass};
pub use state::{BlinkPhase, BlinkState, BlinkUpdate};
pub use stream::{run_stream, StreamSummary};
pub use stress::{DistanceHistory, StressLabel, StressLabelRule, StressScore};

use frame_source::{FrameError, VideoFrame};
use inference_engine::InferenceError;
use landmarks::LandmarkError;
use thiserror::Error;
use tracing::{debug, warn};

/// Affect pipeline error types
#[derive(Error, Debug)]
pub enum AffectError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("No face detected")]
    NoFaceDetected,

    #[error("Distance history has zero range, stress score is undefined")]
    DegenerateHistory,

    #[error("Malformed image: {0}")]
    MalformedImage(String),

    #[error("Landmark error: {0}")]
    Landmarks(#[from] LandmarkError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<InferenceError> for AffectError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::ModelNotFound(path) => AffectError::ModelUnavailable(path),
            InferenceError::ModelLoadError(msg) => AffectError::ModelLoad(msg),
            other => AffectError::Inference(other.to_string()),
        }
    }
}

/// Streaming blink and eyebrow monitor for one session
pub struct BlinkMonitor {
    config: AffectConfig,
    models: Models,
    state: BlinkState,
}

impl BlinkMonitor {
    /// Create a monitor with fresh blink state
    pub fn new(config: AffectConfig, models: Models) -> Self {
        Self {
            config,
            models,
            state: BlinkState::default(),
        }
    }

    /// Analyze a single frame.
    ///
    /// The blink state advances on the first face with usable landmarks; a
    /// frame without one leaves it untouched. The frame-level eyebrow
    /// metrics come from the last scored face, as in request mode.
    pub fn analyze(&mut self, frame: &VideoFrame) -> Result<FrameAnalysis, AffectError> {
        let frame = frame.resize_to_width(self.config.processing_width, &self.config.limits)?;
        let gray = frame.to_grayscale();
        let equalized = frame.to_clahe_grayscale(&self.config.contrast);

        let faces = self.models.face_detector.detect(&equalized)?;

        if faces.is_empty() {
            debug!("Frame {}: no face", frame.sequence);
            return Ok(FrameAnalysis {
                sequence: frame.sequence,
                timestamp_ns: frame.timestamp_ns,
                total_blinks: self.state.total_blinks,
                ..Default::default()
            });
        }

        let mut face_metrics = Vec::new();
        let mut blink_completed = false;
        let mut blink_updated = false;

        for face in self.config.aggregation.select(faces) {
            let landmarks = match self.models.landmark_predictor.predict(&gray, &face) {
                Ok(landmarks) => landmarks,
                Err(e) => {
                    warn!("Frame {}: landmark prediction failed: {}", frame.sequence, e);
                    continue;
                }
            };

            let ear = match landmarks.mean_eye_aspect_ratio() {
                Ok(ear) => Some(ear),
                Err(e) => {
                    debug!("Frame {}: {}", frame.sequence, e);
                    None
                }
            };

            if let (false, Some(ear)) = (blink_updated, ear) {
                let update = self.state.update(ear, &self.config.blink);
                blink_completed = update.blink_completed;
                blink_updated = true;
                if blink_completed {
                    metrics::counter!("affect_blinks_total").increment(1);
                    debug!("Blink #{} at frame {}", update.total_blinks, frame.sequence);
                }
            }

            let (left, right) = landmarks.eyebrow_spans();
            face_metrics.push(FaceMetrics {
                face,
                eye_aspect_ratio: ear,
                left_eyebrow_metric: left,
                right_eyebrow_metric: right,
            });
        }

        let summary = face_metrics.last();
        Ok(FrameAnalysis {
            sequence: frame.sequence,
            timestamp_ns: frame.timestamp_ns,
            face_detected: true,
            total_blinks: self.state.total_blinks,
            blink_completed,
            left_eyebrow_metric: summary.map(|m| m.left_eyebrow_metric),
            right_eyebrow_metric: summary.map(|m| m.right_eyebrow_metric),
            faces: face_metrics,
        })
    }

    /// Current blink state
    pub fn state(&self) -> &BlinkState {
        &self.state
    }

    pub fn total_blinks(&self) -> u64 {
        self.state.total_blinks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(sequence: u32) -> VideoFrame {
        VideoFrame::new(vec![90; 100 * 80 * 3], 100, 80, 0, sequence).unwrap()
    }

    fn monitor_with(ears: Vec<f64>, detector: MockFaceDetector) -> BlinkMonitor {
        let models = Models {
            face_detector: Arc::new(detector),
            landmark_predictor: Arc::new(MockLandmarkPredictor::scripted(ears)),
            emotion_classifier: Arc::new(MockEmotionClassifier::default()),
        };
        BlinkMonitor::new(AffectConfig::default(), models)
    }

    #[test]
    fn test_counts_blink_across_frames() {
        let mut ears = vec![0.1; 5];
        ears.push(0.4);
        let mut monitor = monitor_with(ears, MockFaceDetector::centered());

        let mut completed_at = None;
        for i in 0..6 {
            let analysis = monitor.analyze(&frame(i)).unwrap();
            assert!(analysis.face_detected);
            if analysis.blink_completed {
                completed_at = Some(i);
            }
        }
        assert_eq!(completed_at, Some(5));
        assert_eq!(monitor.total_blinks(), 1);
        assert_eq!(monitor.state().consecutive_low_frames, 0);
    }

    #[test]
    fn test_frames_without_face_do_not_advance_state() {
        let mut monitor = monitor_with(vec![0.1; 3], MockFaceDetector::fixed(Vec::new()));
        for i in 0..10 {
            let analysis = monitor.analyze(&frame(i)).unwrap();
            assert!(!analysis.face_detected);
            assert!(analysis.left_eyebrow_metric.is_none());
        }
        assert_eq!(monitor.state(), &BlinkState::default());
    }

    #[test]
    fn test_reports_eyebrow_metrics() {
        let mut monitor = monitor_with(vec![0.375], MockFaceDetector::centered());
        let analysis = monitor.analyze(&frame(0)).unwrap();

        let left = analysis.left_eyebrow_metric.unwrap();
        let right = analysis.right_eyebrow_metric.unwrap();
        assert!(left > 0.0);
        assert!((left - right).abs() < 1e-9);
        assert_eq!(analysis.faces.len(), 1);
    }

    #[test]
    fn test_multiple_faces_advance_blink_once() {
        let bbox = |x: f32| FaceBbox {
            x,
            y: 10.0,
            width: 30.0,
            height: 30.0,
            confidence: 0.9,
        };
        let detector = MockFaceDetector::fixed(vec![bbox(0.0), bbox(50.0)]);
        // Each frame consumes two script entries, one per face
        let mut monitor = monitor_with(vec![0.1, 0.4, 0.1, 0.4, 0.1, 0.4], detector);
        for i in 0..3 {
            let analysis = monitor.analyze(&frame(i)).unwrap();
            assert_eq!(analysis.faces.len(), 2);
        }
        assert_eq!(monitor.state().consecutive_low_frames, 3);
    }

    #[test]
    fn test_eyebrow_summary_comes_from_last_face() {
        let bbox = |x: f32, side: f32| FaceBbox {
            x,
            y: 10.0,
            width: side,
            height: side,
            confidence: 0.9,
        };
        let detector = MockFaceDetector::fixed(vec![bbox(0.0, 100.0), bbox(200.0, 200.0)]);
        let mut monitor = monitor_with(vec![0.4, 0.4], detector);
        let analysis = monitor.analyze(&frame(0)).unwrap();

        let last = &analysis.faces[1];
        assert_eq!(analysis.left_eyebrow_metric, Some(last.left_eyebrow_metric));
        assert_eq!(analysis.right_eyebrow_metric, Some(last.right_eyebrow_metric));
        assert_ne!(analysis.faces[0].left_eyebrow_metric, last.left_eyebrow_metric);
    }

    #[test]
    fn test_oversized_frame_is_a_frame_error() {
        let mut monitor = monitor_with(vec![0.4], MockFaceDetector::centered());
        let tall = VideoFrame::new(vec![0; 2 * 2000 * 3], 2, 2000, 0, 0).unwrap();
        let err = monitor.analyze(&tall).unwrap_err();
        assert!(matches!(err, AffectError::Frame(frame_source::FrameError::TooLarge { .. })));
        assert_eq!(monitor.state(), &BlinkState::default());
    }

    #[test]
    fn test_inference_error_mapping() {
        let err: AffectError = InferenceError::ModelNotFound("x.onnx".into()).into();
        assert!(matches!(err, AffectError::ModelUnavailable(_)));
        let err: AffectError = InferenceError::InferenceFailed("nan".into()).into();
        assert!(matches!(err, AffectError::Inference(_)));
    }
}
