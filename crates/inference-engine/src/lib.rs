//! ONNX Inference Engine
//!
//! Runs image classifiers (the emotion model) with tract-onnx. Models are
//! loaded once and shared read-only; a mock mode stands in when no model
//! file is available.

mod engine;

pub use engine::{InferenceEngine, InferenceResult, InputLayout};

use thiserror::Error;

/// Errors during inference
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model file not found: {0}")]
    ModelNotFound(String),
    #[error("Model load failed: {0}")]
    ModelLoadError(String),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Invalid input shape: expected {expected}, got {actual}")]
    InvalidInputShape { expected: String, actual: String },
}
