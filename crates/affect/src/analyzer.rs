//! Request-mode stress analysis of a single uploaded image

use frame_source::VideoFrame;
use tracing::{debug, warn};

use crate::analysis::{FaceObservation, FaceStress, StressReport};
use crate::config::AffectConfig;
use crate::detector::Models;
use crate::stress::DistanceHistory;
use crate::AffectError;

/// Scores uploaded images against a distance history.
///
/// Inference ([`observe`](Self::observe)) is separated from scoring
/// ([`score`](Self::score)) so callers can run the models without holding
/// the history.
pub struct StressAnalyzer {
    config: AffectConfig,
    models: Models,
}

impl StressAnalyzer {
    pub fn new(config: AffectConfig, models: Models) -> Self {
        Self { config, models }
    }

    /// Decode an upload and run detection, emotion, and landmark models.
    ///
    /// Returns [`AffectError::MalformedImage`] for undecodable or oversized
    /// input and [`AffectError::NoFaceDetected`] when the detector finds nothing.
    pub fn observe(&self, image_bytes: &[u8]) -> Result<Vec<FaceObservation>, AffectError> {
        let limits = &self.config.limits;
        let frame = VideoFrame::decode(image_bytes, limits)
            .and_then(|frame| frame.resize_to_width(self.config.processing_width, limits))
            .map_err(|e| AffectError::MalformedImage(e.to_string()))?;
        let gray = frame.to_grayscale();

        let faces = self.models.face_detector.detect(&gray)?;
        metrics::counter!("affect_faces_detected_total").increment(faces.len() as u64);
        if faces.is_empty() {
            return Err(AffectError::NoFaceDetected);
        }

        let selected = self.config.aggregation.select(faces);
        debug!("Scoring {} faces", selected.len());

        let observations = selected
            .into_iter()
            .map(|face| {
                let emotion = match frame.crop_clamped(
                    face.x as f64,
                    face.y as f64,
                    face.width as f64,
                    face.height as f64,
                ) {
                    Some(crop) => match self.models.emotion_classifier.classify(&crop) {
                        Ok(scores) => Some(scores.top()),
                        Err(e) => {
                            warn!("Emotion classification failed: {}", e);
                            None
                        }
                    },
                    None => {
                        warn!("Face box {:?} lies outside the image", face);
                        None
                    }
                };

                let inter_brow_distance = match self.models.landmark_predictor.predict(&gray, &face) {
                    Ok(landmarks) => Some(landmarks.inter_brow_distance()),
                    Err(e) => {
                        warn!("Landmark prediction failed: {}", e);
                        None
                    }
                };

                FaceObservation {
                    face,
                    emotion,
                    inter_brow_distance,
                }
            })
            .collect();

        Ok(observations)
    }

    /// Score observations in order against `history`.
    ///
    /// A degenerate history range or a missing distance yields the
    /// Undetermined sentinel for that face instead of an error.
    pub fn score(&self, observations: &[FaceObservation], history: &mut DistanceHistory) -> StressReport {
        let rule = self.config.stress.label_rule;

        let faces = observations
            .iter()
            .map(|observation| match observation.inter_brow_distance {
                Some(distance) => match history.score(distance, rule) {
                    Ok(score) => FaceStress::scored(observation, &score),
                    Err(e) => {
                        warn!("Stress score undefined for distance {:.2}: {}", distance, e);
                        FaceStress::undetermined(observation)
                    }
                },
                None => FaceStress::undetermined(observation),
            })
            .collect();

        StressReport::from_faces(faces)
    }

    /// Observe and score in one call; a faceless image yields the sentinel report
    pub fn analyze(&self, image_bytes: &[u8], history: &mut DistanceHistory) -> Result<StressReport, AffectError> {
        match self.observe(image_bytes) {
            Ok(observations) => Ok(self.score(&observations, history)),
            Err(AffectError::NoFaceDetected) => Ok(StressReport::no_face()),
            Err(e) => Err(e),
        }
    }
}
