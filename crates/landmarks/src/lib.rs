//! Facial Landmark Geometry
//!
//! Point and landmark-set types for the 68-point (iBUG 300-W) convention,
//! plus the pure geometric features derived from them:
//! - Eye aspect ratio (EAR)
//! - Eyebrow vertical span
//! - Inter-eyebrow distance

mod geometry;
mod set;

pub use geometry::{eye_aspect_ratio, eyebrow_span, point_distance};
pub use set::{LandmarkSet, Region, LANDMARK_COUNT};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Landmark errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("Expected {expected} landmark points, got {actual}")]
    WrongPointCount { expected: usize, actual: usize },

    #[error("Point sequence is empty")]
    Empty,

    #[error("Landmark {index} has a non-finite coordinate")]
    NonFinite { index: usize },

    /// Outer and inner eye corners coincide, EAR denominator is zero
    #[error("Degenerate eye contour: horizontal distance is zero")]
    DegenerateEye,
}

/// 2D landmark point in frame pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Scale both coordinates by `factor`
    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self::new(x as f64, y as f64)
    }
}
