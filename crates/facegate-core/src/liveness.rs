//! Passive liveness scoring over a short history of detections.
//!
//! Four cheap signals are read from the newest buffered frame: open eyes
//! (eye aspect ratio), natural facial asymmetry, small frame-to-frame head
//! movement and skin texture. A printed photo or a frozen screen tends to be
//! perfectly still and overly symmetric. Blinks are tracked separately as a
//! swing in EAR across the buffer.

use crate::geometry::{self, LEFT_EYE_OUTER, MOUTH_LEFT, MOUTH_RIGHT, NOSE_TIP, RIGHT_EYE_OUTER};
use crate::sensitivity::SensitivityProfile;
use crate::types::{BoundingBox, DetectionResult};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of detections kept for liveness analysis.
pub const FRAME_BUFFER_CAPACITY: usize = 10;

/// Frames required before a liveness verdict is produced.
pub const MIN_FRAMES_FOR_LIVENESS: usize = 3;

/// Frames required before a blink can be reported.
pub const MIN_FRAMES_FOR_BLINK: usize = 5;

/// Mean displacement (px) at or above which movement looks like a
/// repositioned or swapped image rather than natural motion.
const MAX_NATURAL_MOVEMENT: f32 = 8.0;

/// Landmarks tracked for movement: nose tip, outer eye corners, mouth corners.
const MOVEMENT_POINTS: [usize; 5] = [NOSE_TIP, LEFT_EYE_OUTER, RIGHT_EYE_OUTER, MOUTH_LEFT, MOUTH_RIGHT];

/// Texture variance above which the face surface counts as real skin.
const TEXTURE_THRESHOLD: f32 = 0.3;

const WEIGHT_EYES: f32 = 0.3;
const WEIGHT_SYMMETRY: f32 = 0.3;
const WEIGHT_MOVEMENT: f32 = 0.2;
const WEIGHT_TEXTURE: f32 = 0.2;

/// One sampled detection plus the texture signal measured on its frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedFrame {
    pub detection: DetectionResult,
    pub texture_variance: f32,
}

impl From<DetectionResult> for BufferedFrame {
    fn from(detection: DetectionResult) -> Self {
        Self {
            detection,
            texture_variance: 0.0,
        }
    }
}

/// Bounded FIFO of recent detections. The oldest frame is evicted on overflow.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: VecDeque<BufferedFrame>,
    capacity: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_capacity(FRAME_BUFFER_CAPACITY)
    }
}

impl FrameBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: impl Into<BufferedFrame>) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame.into());
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &BufferedFrame> + ExactSizeIterator {
        self.frames.iter()
    }

    pub fn latest(&self) -> Option<&BufferedFrame> {
        self.frames.back()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Raw signal values behind a liveness verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivenessDetails {
    pub eye_aspect_ratio: f32,
    pub symmetry_score: f32,
    pub movement_score: f32,
    pub texture_variance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessScore {
    pub is_live: bool,
    /// Weighted sum of the passing signals, in [0, 1].
    pub confidence: f32,
    /// Failing signals, or "all checks passed".
    pub reason: String,
    pub details: LivenessDetails,
}

/// Scores the newest buffered frame against a sensitivity profile.
#[derive(Debug, Clone, Default)]
pub struct LivenessAnalyzer;

impl LivenessAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Returns `None` until the buffer holds [`MIN_FRAMES_FOR_LIVENESS`] frames.
    pub fn evaluate(&self, buffer: &FrameBuffer, profile: &SensitivityProfile) -> Option<LivenessScore> {
        if buffer.len() < MIN_FRAMES_FOR_LIVENESS {
            return None;
        }

        let mut recent = buffer.iter().rev();
        let latest = recent.next()?;
        let previous = recent.next()?;
        let landmarks = &latest.detection.landmarks;

        let details = LivenessDetails {
            eye_aspect_ratio: geometry::mean_eye_aspect_ratio(landmarks),
            symmetry_score: geometry::facial_symmetry_score(landmarks),
            movement_score: movement_score(
                mean_key_point_displacement(&previous.detection, &latest.detection),
                profile.movement_threshold,
            ),
            texture_variance: latest.texture_variance,
        };

        let mut confidence = 0.0;
        let mut failing = Vec::new();

        if details.eye_aspect_ratio > profile.blink_threshold {
            confidence += WEIGHT_EYES;
        } else {
            failing.push("eyes closed or not visible");
        }
        if details.symmetry_score < profile.symmetry_threshold {
            confidence += WEIGHT_SYMMETRY;
        } else {
            failing.push("face unnaturally symmetric");
        }
        if details.movement_score > 0.0 {
            confidence += WEIGHT_MOVEMENT;
        } else {
            failing.push("no natural movement");
        }
        if details.texture_variance > TEXTURE_THRESHOLD {
            confidence += WEIGHT_TEXTURE;
        } else {
            failing.push("flat texture");
        }

        let confidence = f32::min(confidence, 1.0);
        let is_live = confidence >= profile.liveness_threshold;
        let reason = if failing.is_empty() {
            "all checks passed".to_string()
        } else {
            failing.join("; ")
        };

        tracing::trace!(
            is_live,
            confidence,
            ear = details.eye_aspect_ratio,
            symmetry = details.symmetry_score,
            movement = details.movement_score,
            texture = details.texture_variance,
            "liveness evaluated"
        );

        Some(LivenessScore {
            is_live,
            confidence,
            reason,
            details,
        })
    }
}

/// Mean displacement of the movement key points between two detections.
pub fn mean_key_point_displacement(previous: &DetectionResult, latest: &DetectionResult) -> f32 {
    let total: f32 = MOVEMENT_POINTS
        .iter()
        .map(|&i| geometry::euclidean_distance(previous.landmarks.get(i), latest.landmarks.get(i)))
        .sum();
    total / MOVEMENT_POINTS.len() as f32
}

/// 1 for natural motion, 0 for a static face, 0.5 for implausibly large jumps.
fn movement_score(displacement: f32, static_threshold: f32) -> f32 {
    if displacement <= static_threshold {
        0.0
    } else if displacement < MAX_NATURAL_MOVEMENT {
        1.0
    } else {
        0.5
    }
}

/// Tracks whether a blink has been seen since the last reset.
#[derive(Debug, Clone, Default)]
pub struct BlinkTracker {
    detected: bool,
}

impl BlinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the buffer for an EAR swing larger than `blink_threshold`.
    /// Once a blink is seen the flag stays set until [`reset`](Self::reset).
    pub fn update(&mut self, buffer: &FrameBuffer, blink_threshold: f32) -> bool {
        if self.detected || buffer.len() < MIN_FRAMES_FOR_BLINK {
            return self.detected;
        }

        let (min, max) = buffer
            .iter()
            .map(|f| geometry::mean_eye_aspect_ratio(&f.detection.landmarks))
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), ear| (lo.min(ear), hi.max(ear)));

        if max - min > blink_threshold {
            tracing::debug!(swing = max - min, "blink detected");
            self.detected = true;
        }
        self.detected
    }

    pub fn detected(&self) -> bool {
        self.detected
    }

    pub fn reset(&mut self) {
        self.detected = false;
    }
}

/// Produces the texture signal for one frame, in [0, 1].
pub trait TextureAnalyzer: Send + Sync {
    fn analyze(&self, image: &RgbaImage, face: &BoundingBox) -> f32;
}

/// Texture stub: always 0, so texture never passes on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTexture;

impl TextureAnalyzer for NullTexture {
    fn analyze(&self, _image: &RgbaImage, _face: &BoundingBox) -> f32 {
        0.0
    }
}

/// Luma standard deviation inside the face box, normalized by 128.
#[derive(Debug, Clone, Copy, Default)]
pub struct LumaVarianceTexture;

impl TextureAnalyzer for LumaVarianceTexture {
    fn analyze(&self, image: &RgbaImage, face: &BoundingBox) -> f32 {
        let (w, h) = image.dimensions();
        let x0 = face.x.max(0.0) as u32;
        let y0 = face.y.max(0.0) as u32;
        let x1 = ((face.x + face.width).max(0.0) as u32).min(w);
        let y1 = ((face.y + face.height).max(0.0) as u32).min(h);
        if x0 >= x1 || y0 >= y1 {
            return 0.0;
        }

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for y in y0..y1 {
            for x in x0..x1 {
                let [r, g, b, _] = image.get_pixel(x, y).0;
                let luma = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
                sum += luma;
                sum_sq += luma * luma;
            }
        }
        let n = ((x1 - x0) * (y1 - y0)) as f64;
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        ((variance.sqrt() / 128.0) as f32).clamp(0.0, 1.0)
    }
}

/// Look up a texture analyzer by its configuration name (`none` or `luma`).
pub fn texture_analyzer_by_name(name: &str) -> Option<Box<dyn TextureAnalyzer>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "none" | "null" => Some(Box::new(NullTexture)),
        "luma" | "luma-variance" => Some(Box::new(LumaVarianceTexture)),
        _ => None,
    }
}
