//! Eye and eyebrow geometry

use crate::{LandmarkError, Point};

/// Euclidean distance between two points
pub fn point_distance(a: Point, b: Point) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Eye aspect ratio of a 6-point eye contour.
///
/// Points follow the usual contour order: 0 = outer corner, 1 and 2 = upper
/// lid, 3 = inner corner, 4 and 5 = lower lid. The ratio is
/// `(|p1 - p5| + |p2 - p4|) / (2 * |p0 - p3|)`; lower values mean a more
/// closed eyelid.
///
/// Returns [`LandmarkError::DegenerateEye`] when the corners coincide.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> Result<f64, LandmarkError> {
    let vertical_1 = point_distance(eye[1], eye[5]);
    let vertical_2 = point_distance(eye[2], eye[4]);
    let horizontal = point_distance(eye[0], eye[3]);

    if horizontal == 0.0 {
        return Err(LandmarkError::DegenerateEye);
    }

    Ok((vertical_1 + vertical_2) / (2.0 * horizontal))
}

/// Half the vertical extent of an eyebrow: `(max_y - min_y) / 2`.
///
/// This is a spread measure, not a mean position. A single point yields 0.
pub fn eyebrow_span(eyebrow: &[Point]) -> Result<f64, LandmarkError> {
    if eyebrow.is_empty() {
        return Err(LandmarkError::Empty);
    }

    let min_y = eyebrow.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = eyebrow.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

    Ok((max_y - min_y) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open_eye() -> [Point; 6] {
        [
            Point::new(0.0, 0.0),
            Point::new(1.0, -1.0),
            Point::new(2.0, -1.0),
            Point::new(3.0, 0.0),
            Point::new(2.0, 1.0),
            Point::new(1.0, 1.0),
        ]
    }

    #[test]
    fn test_point_distance() {
        let d = point_distance(Point::new(0.0, 0.0), Point::new(3.0, 4.0));
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_eye_aspect_ratio_open_eye() {
        // Verticals are 2 and 2, horizontal is 3
        let ear = eye_aspect_ratio(&open_eye()).unwrap();
        assert!((ear - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_eye_aspect_ratio_closed_eye() {
        let closed = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(3.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(1.0, 0.0),
        ];
        assert_eq!(eye_aspect_ratio(&closed).unwrap(), 0.0);
    }

    #[test]
    fn test_eye_aspect_ratio_degenerate() {
        let mut eye = open_eye();
        eye[3] = eye[0];
        assert_eq!(eye_aspect_ratio(&eye), Err(LandmarkError::DegenerateEye));
    }

    #[test]
    fn test_eyebrow_span() {
        let brow = [
            Point::new(0.0, 10.0),
            Point::new(1.0, 6.0),
            Point::new(2.0, 4.0),
            Point::new(3.0, 5.0),
            Point::new(4.0, 9.0),
        ];
        assert_eq!(eyebrow_span(&brow).unwrap(), 3.0);
    }

    #[test]
    fn test_eyebrow_span_single_point() {
        assert_eq!(eyebrow_span(&[Point::new(5.0, 7.0)]).unwrap(), 0.0);
    }

    #[test]
    fn test_eyebrow_span_empty() {
        assert_eq!(eyebrow_span(&[]), Err(LandmarkError::Empty));
    }

    fn coord() -> impl Strategy<Value = f64> {
        -500.0f64..500.0
    }

    fn eye_strategy() -> impl Strategy<Value = [Point; 6]> {
        proptest::array::uniform6((coord(), coord()))
            .prop_map(|pts| pts.map(|(x, y)| Point::new(x, y)))
            .prop_filter("corners must be apart", |eye| {
                point_distance(eye[0], eye[3]) > 1e-3
            })
    }

    proptest! {
        #[test]
        fn ear_is_non_negative(eye in eye_strategy()) {
            prop_assert!(eye_aspect_ratio(&eye).unwrap() >= 0.0);
        }

        #[test]
        fn ear_is_scale_invariant(eye in eye_strategy(), factor in 0.01f64..100.0) {
            let base = eye_aspect_ratio(&eye).unwrap();
            let scaled = eye_aspect_ratio(&eye.map(|p| p.scaled(factor))).unwrap();
            prop_assert!((base - scaled).abs() <= 1e-9 * base.max(1.0));
        }

        #[test]
        fn geometry_is_idempotent(eye in eye_strategy()) {
            let first = eye_aspect_ratio(&eye).unwrap();
            let second = eye_aspect_ratio(&eye).unwrap();
            prop_assert_eq!(first.to_bits(), second.to_bits());

            let span_a = eyebrow_span(&eye).unwrap();
            let span_b = eyebrow_span(&eye).unwrap();
            prop_assert_eq!(span_a.to_bits(), span_b.to_bits());
        }
    }
}
