//! Face detection, landmark regression, and emotion classification models

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use frame_source::VideoFrame;
use image::imageops::{self, FilterType};
use image::GrayImage;
use inference_engine::InferenceEngine;
use landmarks::{LandmarkSet, Point, LANDMARK_COUNT};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::ModelConfig;
use crate::emotion::EmotionScores;
use crate::AffectError;

/// Face bounding box in frame pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceBbox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBbox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Finds face regions in a grayscale frame
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBbox>, AffectError>;
}

/// Regresses the 68 landmarks of one face
pub trait LandmarkPredictor: Send + Sync {
    fn predict(&self, image: &GrayImage, face: &FaceBbox) -> Result<LandmarkSet, AffectError>;
}

/// Scores a face crop over the 7 emotion classes
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, face: &VideoFrame) -> Result<EmotionScores, AffectError>;
}

/// The three collaborator models, loaded once and shared read-only
#[derive(Clone)]
pub struct Models {
    pub face_detector: Arc<dyn FaceDetector>,
    pub landmark_predictor: Arc<dyn LandmarkPredictor>,
    pub emotion_classifier: Arc<dyn EmotionClassifier>,
}

impl Models {
    /// Load every configured model.
    ///
    /// A missing path is fatal unless `allow_mock` is set, in which case the
    /// mock model for that slot is used.
    pub fn load(config: &ModelConfig) -> Result<Self, AffectError> {
        let face_detector: Arc<dyn FaceDetector> = match &config.face_model_path {
            Some(path) => Arc::new(OnnxFaceDetector::new(path, config)?),
            None => {
                require_mock(config, "face_model_path")?;
                Arc::new(MockFaceDetector::centered())
            }
        };

        let landmark_predictor: Arc<dyn LandmarkPredictor> = match &config.landmark_model_path {
            Some(path) => Arc::new(OnnxLandmarkPredictor::new(path, config)?),
            None => {
                require_mock(config, "landmark_model_path")?;
                Arc::new(MockLandmarkPredictor::default())
            }
        };

        let emotion_classifier: Arc<dyn EmotionClassifier> = match &config.emotion_model_path {
            Some(path) => Arc::new(OnnxEmotionClassifier::new(path, config)?),
            None => {
                require_mock(config, "emotion_model_path")?;
                Arc::new(OnnxEmotionClassifier::mock(config))
            }
        };

        Ok(Self {
            face_detector,
            landmark_predictor,
            emotion_classifier,
        })
    }

    /// All-mock model set
    pub fn mock() -> Self {
        Self {
            face_detector: Arc::new(MockFaceDetector::centered()),
            landmark_predictor: Arc::new(MockLandmarkPredictor::default()),
            emotion_classifier: Arc::new(MockEmotionClassifier::default()),
        }
    }
}

fn require_mock(config: &ModelConfig, field: &str) -> Result<(), AffectError> {
    if config.allow_mock {
        warn!("No {} configured. Using mock implementation.", field);
        Ok(())
    } else {
        error!("{} is not configured and mock models are disabled", field);
        Err(AffectError::ModelUnavailable(format!("{} is not configured", field)))
    }
}

fn load_session(path: &str, what: &str) -> Result<Session, AffectError> {
    if !std::path::Path::new(path).exists() {
        error!("{} model file {} does not exist", what, path);
        return Err(AffectError::ModelUnavailable(path.to_string()));
    }

    info!("Loading {} model from {}", what, path);
    Session::builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|builder| builder.commit_from_file(path))
        .map_err(|e| {
            error!("Failed to load {} model: {}", what, e);
            AffectError::ModelLoad(format!("{}: {}", path, e))
        })
}

/// Run a single-input session on a `1x1xSxS` tensor and flatten the first output
fn run_session(session: &Session, input: Array4<f32>) -> Result<Vec<f32>, AffectError> {
    let outputs = session
        .run(ort::inputs![input].map_err(|e| AffectError::Inference(e.to_string()))?)
        .map_err(|e| AffectError::Inference(e.to_string()))?;

    let tensor = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| AffectError::Inference(e.to_string()))?;

    Ok(tensor.iter().copied().collect())
}

/// Grayscale image to a normalized `1x1xSxS` tensor
fn gray_tensor(image: &GrayImage, side: u32) -> Array4<f32> {
    let resized = imageops::resize(image, side, side, FilterType::Triangle);
    let side = side as usize;
    let mut input = Array4::<f32>::zeros((1, 1, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
    }
    input
}

/// ONNX face detector.
///
/// Expects a `1x1xSxS` grayscale input in `[0, 1]` and emits rows of
/// `[x1, y1, x2, y2, score]` with coordinates normalized to the input.
pub struct OnnxFaceDetector {
    session: Session,
    input_size: u32,
    confidence_threshold: f32,
}

impl OnnxFaceDetector {
    pub fn new(path: &str, config: &ModelConfig) -> Result<Self, AffectError> {
        Ok(Self {
            session: load_session(path, "face detection")?,
            input_size: config.detector_input_size,
            confidence_threshold: config.face_confidence,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBbox>, AffectError> {
        let (width, height) = (image.width() as f32, image.height() as f32);
        let rows = run_session(&self.session, gray_tensor(image, self.input_size))?;

        let faces: Vec<FaceBbox> = rows
            .chunks_exact(5)
            .filter(|row| row[4] >= self.confidence_threshold)
            .map(|row| FaceBbox {
                x: row[0] * width,
                y: row[1] * height,
                width: (row[2] - row[0]) * width,
                height: (row[3] - row[1]) * height,
                confidence: row[4],
            })
            .filter(|face| face.width > 0.0 && face.height > 0.0)
            .collect();

        debug!("Detected {} faces", faces.len());
        Ok(faces)
    }
}

/// ONNX 68-point landmark regressor.
///
/// Expects a `1x1xSxS` grayscale face crop and emits 136 values, `(x, y)`
/// pairs normalized to the crop.
pub struct OnnxLandmarkPredictor {
    session: Session,
    input_size: u32,
}

impl OnnxLandmarkPredictor {
    pub fn new(path: &str, config: &ModelConfig) -> Result<Self, AffectError> {
        Ok(Self {
            session: load_session(path, "landmark")?,
            input_size: config.landmark_input_size,
        })
    }
}

impl LandmarkPredictor for OnnxLandmarkPredictor {
    fn predict(&self, image: &GrayImage, face: &FaceBbox) -> Result<LandmarkSet, AffectError> {
        let x0 = face.x.max(0.0).floor() as u32;
        let y0 = face.y.max(0.0).floor() as u32;
        let x1 = ((face.x + face.width).ceil() as u32).min(image.width());
        let y1 = ((face.y + face.height).ceil() as u32).min(image.height());
        if x1 <= x0 || y1 <= y0 {
            return Err(AffectError::Inference("face box lies outside the frame".into()));
        }

        let (crop_w, crop_h) = (x1 - x0, y1 - y0);
        let crop = imageops::crop_imm(image, x0, y0, crop_w, crop_h).to_image();
        let values = run_session(&self.session, gray_tensor(&crop, self.input_size))?;

        if values.len() != LANDMARK_COUNT * 2 {
            return Err(AffectError::Inference(format!(
                "expected {} landmark values, got {}",
                LANDMARK_COUNT * 2,
                values.len()
            )));
        }

        let points = values
            .chunks_exact(2)
            .map(|xy| {
                Point::new(
                    x0 as f64 + xy[0] as f64 * crop_w as f64,
                    y0 as f64 + xy[1] as f64 * crop_h as f64,
                )
            })
            .collect();

        Ok(LandmarkSet::new(points)?)
    }
}

/// Emotion classifier backed by the tract inference engine
pub struct OnnxEmotionClassifier {
    engine: InferenceEngine,
}

impl OnnxEmotionClassifier {
    pub fn new(path: &str, config: &ModelConfig) -> Result<Self, AffectError> {
        Ok(Self {
            engine: InferenceEngine::load(path, config.emotion_input)?,
        })
    }

    /// Mock engine answering "neutral"
    pub fn mock(config: &ModelConfig) -> Self {
        Self {
            engine: InferenceEngine::mock(config.emotion_input, MockEmotionClassifier::default().scores.0.to_vec()),
        }
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn classify(&self, face: &VideoFrame) -> Result<EmotionScores, AffectError> {
        let layout = self.engine.layout();
        let resized = face.resize(layout.width as u32, layout.height as u32);
        let input = resized.normalized_pixels(layout.channels == 1);

        let result = self.engine.predict(&input)?;
        debug!("Emotion inference took {}ms (mock: {})", result.latency_ms, result.used_mock);
        metrics::histogram!("affect_inference_latency_ms").record(result.latency_ms as f64);

        EmotionScores::from_slice(&result.scores)
    }
}

/// Detector returning fixed boxes, or one centered box scaled to the frame
#[derive(Debug, Clone)]
pub struct MockFaceDetector {
    faces: Option<Vec<FaceBbox>>,
}

impl MockFaceDetector {
    /// One face covering the central part of every frame
    pub fn centered() -> Self {
        Self { faces: None }
    }

    /// Always return `faces`
    pub fn fixed(faces: Vec<FaceBbox>) -> Self {
        Self { faces: Some(faces) }
    }
}

impl FaceDetector for MockFaceDetector {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBbox>, AffectError> {
        if let Some(faces) = &self.faces {
            return Ok(faces.clone());
        }
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(vec![FaceBbox {
            x: w * 0.3,
            y: h * 0.2,
            width: w * 0.4,
            height: h * 0.5,
            confidence: 0.95,
        }])
    }
}

/// Eye half-width in the unit face template
const TEMPLATE_EYE_HALF_WIDTH: f64 = 0.08;

/// Places a synthetic 68-point face template inside the box.
///
/// The eye opening follows a script of EAR values, one per call; the last
/// value repeats once the script runs out.
#[derive(Debug)]
pub struct MockLandmarkPredictor {
    script: Mutex<VecDeque<f64>>,
    resting_ear: f64,
}

impl Default for MockLandmarkPredictor {
    fn default() -> Self {
        Self::with_eye_aspect_ratio(0.375)
    }
}

impl MockLandmarkPredictor {
    pub fn with_eye_aspect_ratio(ear: f64) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            resting_ear: ear,
        }
    }

    pub fn scripted(ears: Vec<f64>) -> Self {
        let resting_ear = ears.last().copied().unwrap_or(0.375);
        Self {
            script: Mutex::new(ears.into()),
            resting_ear,
        }
    }

    fn next_ear(&self) -> f64 {
        match self.script.lock() {
            Ok(mut script) => script.pop_front().unwrap_or(self.resting_ear),
            Err(_) => self.resting_ear,
        }
    }

    /// Unit-square template with the given eye aspect ratio
    pub fn template(ear: f64) -> Vec<Point> {
        let mut points = Vec::with_capacity(LANDMARK_COUNT);

        // Jaw 0..17
        for i in 0..17 {
            let theta = PI * i as f64 / 16.0;
            points.push(Point::new(0.5 - 0.45 * theta.cos(), 0.35 + 0.6 * theta.sin()));
        }
        // Eyebrows 17..22 and 22..27
        for start in [0.15, 0.60] {
            for k in 0..5 {
                let arch = 0.04 * (PI * k as f64 / 4.0).sin();
                points.push(Point::new(start + 0.0625 * k as f64, 0.28 - arch));
            }
        }
        // Nose bridge 27..31 and base 31..36
        for k in 0..4 {
            points.push(Point::new(0.5, 0.35 + 0.05 * k as f64));
        }
        for k in 0..5 {
            points.push(Point::new(0.42 + 0.04 * k as f64, 0.6));
        }
        // Eyes 36..42 and 42..48
        let w = TEMPLATE_EYE_HALF_WIDTH;
        let h = ear * w;
        for cx in [0.3, 0.7] {
            let cy = 0.4;
            points.extend([
                Point::new(cx - w, cy),
                Point::new(cx - w / 3.0, cy - h),
                Point::new(cx + w / 3.0, cy - h),
                Point::new(cx + w, cy),
                Point::new(cx + w / 3.0, cy + h),
                Point::new(cx - w / 3.0, cy + h),
            ]);
        }
        // Mouth 48..68
        for k in 0..20 {
            let theta = 2.0 * PI * k as f64 / 20.0;
            points.push(Point::new(0.5 + 0.15 * theta.cos(), 0.78 + 0.05 * theta.sin()));
        }

        points
    }
}

impl LandmarkPredictor for MockLandmarkPredictor {
    fn predict(&self, _image: &GrayImage, face: &FaceBbox) -> Result<LandmarkSet, AffectError> {
        let (fx, fy) = (face.x as f64, face.y as f64);
        let (fw, fh) = (face.width as f64, face.height as f64);
        let points = Self::template(self.next_ear())
            .into_iter()
            .map(|p| Point::new(fx + p.x * fw, fy + p.y * fh))
            .collect();
        Ok(LandmarkSet::new(points)?)
    }
}

/// Classifier answering with fixed scores
#[derive(Debug, Clone)]
pub struct MockEmotionClassifier {
    pub scores: EmotionScores,
}

impl Default for MockEmotionClassifier {
    fn default() -> Self {
        Self {
            scores: EmotionScores([0.05, 0.02, 0.05, 0.1, 0.08, 0.05, 0.65]),
        }
    }
}

impl EmotionClassifier for MockEmotionClassifier {
    fn classify(&self, _face: &VideoFrame) -> Result<EmotionScores, AffectError> {
        Ok(self.scores)
    }
}
