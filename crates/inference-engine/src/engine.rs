//! Inference Engine Implementation

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tract_onnx::prelude::*;
use tracing::{debug, info};

use crate::InferenceError;

type OnnxPlan = TypedRunnableModel<TypedModel>;

/// NHWC input layout of an image classifier (batch size is always 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLayout {
    pub height: usize,
    pub width: usize,
    /// 1 for grayscale models, 3 for RGB
    pub channels: usize,
}

impl InputLayout {
    /// Number of values one input image occupies
    pub fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shape(&self) -> [usize; 4] {
        [1, self.height, self.width, self.channels]
    }
}

impl Default for InputLayout {
    fn default() -> Self {
        // mini-XCEPTION style emotion models take 64x64 crops
        Self {
            height: 64,
            width: 64,
            channels: 3,
        }
    }
}

/// Result of inference operation
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Raw per-class scores in model output order
    pub scores: Vec<f32>,
    /// Inference latency in milliseconds
    pub latency_ms: u64,
    /// Whether the mock model produced the scores
    pub used_mock: bool,
}

/// ONNX Inference Engine
pub struct InferenceEngine {
    /// Expected input layout
    layout: InputLayout,
    /// Optimized runnable plan (None in mock mode)
    plan: Option<OnnxPlan>,
    /// Scores returned in mock mode
    mock_scores: Vec<f32>,
}

impl InferenceEngine {
    /// Load and optimize an ONNX model for the given input layout
    pub fn load(model_path: &str, layout: InputLayout) -> Result<Self, InferenceError> {
        if !Path::new(model_path).exists() {
            return Err(InferenceError::ModelNotFound(model_path.to_string()));
        }

        info!("Loading ONNX model {} with input {:?}", model_path, layout.shape());

        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .and_then(|model| model.with_input_fact(0, f32::fact(layout.shape()).into()))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| InferenceError::ModelLoadError(format!("{}: {}", model_path, e)))?;

        info!("Model loaded successfully");

        Ok(Self {
            layout,
            plan: Some(plan),
            mock_scores: Vec::new(),
        })
    }

    /// Create a mock engine that always answers with `scores`
    pub fn mock(layout: InputLayout, scores: Vec<f32>) -> Self {
        info!("Creating mock inference engine");
        Self {
            layout,
            plan: None,
            mock_scores: scores,
        }
    }

    /// Run inference on one NHWC image in `[0, 1]`
    pub fn predict(&self, input: &[f32]) -> Result<InferenceResult, InferenceError> {
        let start = Instant::now();

        if input.len() != self.layout.len() {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{:?}", self.layout.shape()),
                actual: format!("{} values", input.len()),
            });
        }

        let (scores, used_mock) = match &self.plan {
            Some(plan) => (self.run_plan(plan, input)?, false),
            None => (self.mock_scores.clone(), true),
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!("Inference completed in {}ms", latency_ms);

        Ok(InferenceResult {
            scores,
            latency_ms,
            used_mock,
        })
    }

    fn run_plan(&self, plan: &OnnxPlan, input: &[f32]) -> Result<Vec<f32>, InferenceError> {
        let layout = self.layout;
        let tensor: Tensor = tract_ndarray::Array4::from_shape_vec(
            (1, layout.height, layout.width, layout.channels),
            input.to_vec(),
        )
        .map_err(|e| InferenceError::InvalidInputShape {
            expected: format!("{:?}", layout.shape()),
            actual: e.to_string(),
        })?
        .into();

        let outputs = plan
            .run(tvec!(tensor.into()))
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        let first = outputs
            .first()
            .ok_or_else(|| InferenceError::InferenceFailed("model produced no output".into()))?;

        let view = first
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        Ok(view.iter().copied().collect())
    }

    /// Expected input layout
    pub fn layout(&self) -> InputLayout {
        self.layout
    }
}
