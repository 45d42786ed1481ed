use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in a landmark set (iBUG 68-point convention).
pub const LANDMARK_COUNT: usize = 68;

/// Dimension of a face descriptor.
pub const DESCRIPTOR_LEN: usize = 128;

/// A 2-D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Midpoint of a non-empty set of points. Returns the origin for an empty slice.
    pub fn centroid(points: &[Point]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
        Self::new(sx / n, sy / n)
    }
}

/// Face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Length of the shorter side.
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("expected {LANDMARK_COUNT} landmark points, got {0}")]
    WrongCount(usize),
}

/// The 68 canonical facial keypoints of one detected face.
///
/// Index ranges: 0–16 jaw, 17–26 eyebrows, 27–35 nose (30 = tip),
/// 36–41 left eye, 42–47 right eye, 48–67 mouth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct LandmarkSet {
    points: Box<[Point; LANDMARK_COUNT]>,
}

impl LandmarkSet {
    pub fn new(points: [Point; LANDMARK_COUNT]) -> Self {
        Self {
            points: Box::new(points),
        }
    }

    pub fn points(&self) -> &[Point; LANDMARK_COUNT] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Point {
        self.points[index]
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(self.points.map(|p| p.scaled(factor)))
    }

    /// Five alignment points derived from the full set:
    /// [left eye centre, right eye centre, nose tip, left mouth corner, right mouth corner].
    pub fn alignment_points(&self) -> [(f32, f32); 5] {
        let left_eye = Point::centroid(&self.points[36..42]);
        let right_eye = Point::centroid(&self.points[42..48]);
        let nose = self.points[30];
        let mouth_l = self.points[48];
        let mouth_r = self.points[54];
        [left_eye, right_eye, nose, mouth_l, mouth_r].map(|p| (p.x, p.y))
    }
}

impl TryFrom<Vec<Point>> for LandmarkSet {
    type Error = LandmarkError;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        let len = points.len();
        let boxed: Box<[Point; LANDMARK_COUNT]> = points
            .into_boxed_slice()
            .try_into()
            .map_err(|_| LandmarkError::WrongCount(len))?;
        Ok(Self { points: boxed })
    }
}

impl From<LandmarkSet> for Vec<Point> {
    fn from(set: LandmarkSet) -> Self {
        set.points.to_vec()
    }
}

/// Face descriptor (128-dimensional identity embedding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "mobilefacenet-128").
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One detected face: box, landmarks, descriptor and detector confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bounding_box: BoundingBox,
    pub landmarks: LandmarkSet,
    pub descriptor: Descriptor,
    pub confidence: f32,
}

impl DetectionResult {
    /// Copy with box and landmark coordinates multiplied by `factor`.
    /// The descriptor is scale-invariant and carried over unchanged.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            bounding_box: self.bounding_box.scaled(factor),
            landmarks: self.landmarks.scaled(factor),
            descriptor: self.descriptor.clone(),
            confidence: self.confidence,
        }
    }
}

/// An enrolled descriptor supplied by the caller for identity matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub descriptor: Descriptor,
}

/// Result of matching a query descriptor against a candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub is_match: bool,
    /// ID of the matched candidate (if any).
    pub matched_candidate_id: Option<String>,
    /// Similarity of the matched candidate, or the best similarity seen when unmatched.
    pub similarity: f32,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            is_match: false,
            matched_candidate_id: None,
            similarity,
        }
    }
}
