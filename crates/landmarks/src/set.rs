//! 68-point landmark set and named regions

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::geometry::{eye_aspect_ratio, eyebrow_span, point_distance};
use crate::{LandmarkError, Point};

/// Number of points produced by the landmark predictor
pub const LANDMARK_COUNT: usize = 68;

/// Named landmark regions (iBUG 300-W index ranges, subject's left/right)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    Jaw,
    RightEyebrow,
    LeftEyebrow,
    Nose,
    RightEye,
    LeftEye,
    Mouth,
}

impl Region {
    /// Half-open index range of this region
    pub const fn range(self) -> Range<usize> {
        match self {
            Region::Jaw => 0..17,
            Region::RightEyebrow => 17..22,
            Region::LeftEyebrow => 22..27,
            Region::Nose => 27..36,
            Region::RightEye => 36..42,
            Region::LeftEye => 42..48,
            Region::Mouth => 48..68,
        }
    }
}

/// Immutable set of 68 facial landmarks for one detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Point>,
}

impl LandmarkSet {
    /// Build a landmark set, requiring exactly [`LANDMARK_COUNT`] finite points
    pub fn new(points: Vec<Point>) -> Result<Self, LandmarkError> {
        if points.len() != LANDMARK_COUNT {
            return Err(LandmarkError::WrongPointCount {
                expected: LANDMARK_COUNT,
                actual: points.len(),
            });
        }
        if let Some(index) = points.iter().position(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(LandmarkError::NonFinite { index });
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn region(&self, region: Region) -> &[Point] {
        &self.points[region.range()]
    }

    pub fn left_eye(&self) -> [Point; 6] {
        self.eye(Region::LeftEye)
    }

    pub fn right_eye(&self) -> [Point; 6] {
        self.eye(Region::RightEye)
    }

    fn eye(&self, region: Region) -> [Point; 6] {
        let pts = self.region(region);
        [pts[0], pts[1], pts[2], pts[3], pts[4], pts[5]]
    }

    /// Mean EAR of both eyes
    pub fn mean_eye_aspect_ratio(&self) -> Result<f64, LandmarkError> {
        let left = eye_aspect_ratio(&self.left_eye())?;
        let right = eye_aspect_ratio(&self.right_eye())?;
        Ok((left + right) / 2.0)
    }

    /// Eyebrow spans as `(points 17..22, points 22..27)`.
    ///
    /// On a mirrored camera frame the first range appears on the left of the
    /// image, so it is reported as the left eyebrow metric.
    pub fn eyebrow_spans(&self) -> (f64, f64) {
        // Both ranges are non-empty for a full set
        let first = eyebrow_span(self.region(Region::RightEyebrow)).unwrap_or(0.0);
        let second = eyebrow_span(self.region(Region::LeftEyebrow)).unwrap_or(0.0);
        (first, second)
    }

    /// Distance between the inner eyebrow endpoints (points 21 and 22)
    pub fn inter_brow_distance(&self) -> f64 {
        let right_brow = self.region(Region::RightEyebrow);
        let left_brow = self.region(Region::LeftEyebrow);
        point_distance(right_brow[right_brow.len() - 1], left_brow[0])
    }
}
