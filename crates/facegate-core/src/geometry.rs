//! Pure geometry over landmark points: distances, eye aspect ratio and
//! facial symmetry.

use crate::types::{LandmarkSet, Point};

/// Horizontal eye spread below which the EAR is reported as 0.
const EAR_EPSILON: f32 = 1e-6;

/// Nose tip, used as the vertical midline for symmetry scoring.
pub const NOSE_TIP: usize = 30;
pub const LEFT_EYE_OUTER: usize = 36;
pub const RIGHT_EYE_OUTER: usize = 45;
pub const MOUTH_LEFT: usize = 48;
pub const MOUTH_RIGHT: usize = 54;

/// Bilateral (left, right) landmark pairs compared against the nose midline.
const SYMMETRY_PAIRS: [(usize, usize); 16] = [
    // jaw
    (0, 16),
    (2, 14),
    (4, 12),
    (6, 10),
    // eyebrows
    (17, 26),
    (19, 24),
    (21, 22),
    // eyes
    (36, 45),
    (37, 44),
    (39, 42),
    (41, 46),
    // nose wings
    (31, 35),
    (32, 34),
    // mouth
    (48, 54),
    (49, 53),
    (59, 55),
];

pub fn euclidean_distance(a: Point, b: Point) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// Eye aspect ratio from the six points bounding one eye.
///
/// Point order: `p1` outer corner, `p2`/`p3` upper lid, `p4` inner corner,
/// `p5`/`p6` lower lid. Returns `(|p2-p6| + |p3-p5|) / (2 |p1-p4|)`, or 0
/// when the corners coincide.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> f32 {
    let [p1, p2, p3, p4, p5, p6] = *eye;
    let horizontal = euclidean_distance(p1, p4);
    if horizontal < EAR_EPSILON {
        return 0.0;
    }
    (euclidean_distance(p2, p6) + euclidean_distance(p3, p5)) / (2.0 * horizontal)
}

pub fn left_eye(landmarks: &LandmarkSet) -> [Point; 6] {
    eye_points(landmarks, 36)
}

pub fn right_eye(landmarks: &LandmarkSet) -> [Point; 6] {
    eye_points(landmarks, 42)
}

fn eye_points(landmarks: &LandmarkSet, start: usize) -> [Point; 6] {
    std::array::from_fn(|i| landmarks.get(start + i))
}

/// Mean EAR of both eyes.
pub fn mean_eye_aspect_ratio(landmarks: &LandmarkSet) -> f32 {
    (eye_aspect_ratio(&left_eye(landmarks)) + eye_aspect_ratio(&right_eye(landmarks))) / 2.0
}

/// Bilateral symmetry of a face in [0, 1].
///
/// 1.0 means every left/right pair sits at exactly the same horizontal
/// distance from the nose tip. Static photos tend to score close to 1; live
/// faces show some natural asymmetry. A pair whose points both lie on the
/// midline counts as perfectly symmetric.
pub fn facial_symmetry_score(landmarks: &LandmarkSet) -> f32 {
    let midline = landmarks.get(NOSE_TIP).x;

    let total: f32 = SYMMETRY_PAIRS
        .iter()
        .map(|&(l, r)| {
            let left = (landmarks.get(l).x - midline).abs();
            let right = (landmarks.get(r).x - midline).abs();
            let widest = left.max(right);
            if widest > 0.0 {
                (left - right).abs() / widest
            } else {
                0.0
            }
        })
        .sum();

    let asymmetry = total / SYMMETRY_PAIRS.len() as f32;
    (1.0 - asymmetry).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LANDMARK_COUNT;

    /// Landmarks mirrored about x = 100: every right point is the reflection of
    /// its left partner.
    fn mirrored_face() -> LandmarkSet {
        let mut pts = vec![Point::new(100.0, 0.0); LANDMARK_COUNT];
        for (k, &(l, r)) in SYMMETRY_PAIRS.iter().enumerate() {
            let offset = 10.0 + 3.0 * k as f32;
            let y = 20.0 + k as f32;
            pts[l] = Point::new(100.0 - offset, y);
            pts[r] = Point::new(100.0 + offset, y);
        }
        pts[NOSE_TIP] = Point::new(100.0, 80.0);
        LandmarkSet::try_from(pts).unwrap()
    }

    #[test]
    fn test_euclidean_distance_345() {
        let d = euclidean_distance(Point::new(0.0, 0.0), Point::new(3.0, 4.0));
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_ear_open_eye() {
        // width 30, lid gap 9 at both verticals → 18 / 60 = 0.3
        let eye = [
            Point::new(0.0, 0.0),
            Point::new(10.0, -4.5),
            Point::new(20.0, -4.5),
            Point::new(30.0, 0.0),
            Point::new(20.0, 4.5),
            Point::new(10.0, 4.5),
        ];
        assert!((eye_aspect_ratio(&eye) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_ear_degenerate_returns_zero() {
        let eye = [Point::new(5.0, 5.0); 6];
        assert_eq!(eye_aspect_ratio(&eye), 0.0);
    }

    #[test]
    fn test_ear_finite_and_non_negative() {
        for w in [0.5f32, 1.0, 7.0, 40.0, 300.0] {
            for gap in [0.0f32, 0.1, 3.0, 80.0] {
                let eye = [
                    Point::new(0.0, 0.0),
                    Point::new(w / 3.0, -gap),
                    Point::new(2.0 * w / 3.0, -gap),
                    Point::new(w, 0.0),
                    Point::new(2.0 * w / 3.0, gap),
                    Point::new(w / 3.0, gap),
                ];
                let ear = eye_aspect_ratio(&eye);
                assert!(ear.is_finite() && ear >= 0.0, "w={w} gap={gap} ear={ear}");
            }
        }
    }

    #[test]
    fn test_symmetry_mirrored_face_is_one() {
        let score = facial_symmetry_score(&mirrored_face());
        assert!((score - 1.0).abs() < 1e-5, "score = {score}");
    }

    #[test]
    fn test_symmetry_drops_with_asymmetry() {
        let mut pts = mirrored_face().points().to_vec();
        for &(_, r) in SYMMETRY_PAIRS.iter() {
            pts[r].x += 8.0;
        }
        let skewed = LandmarkSet::try_from(pts).unwrap();
        let score = facial_symmetry_score(&skewed);
        assert!(score < 0.9, "score = {score}");
        assert!(score >= 0.0);
    }

    #[test]
    fn test_symmetry_all_on_midline() {
        let pts = vec![Point::new(50.0, 50.0); LANDMARK_COUNT];
        let set = LandmarkSet::try_from(pts).unwrap();
        assert_eq!(facial_symmetry_score(&set), 1.0);
    }
}
