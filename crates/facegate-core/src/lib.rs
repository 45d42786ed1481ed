//! facegate-core: face detection, liveness and matching engine.
//!
//! Detection runs SCRFD, a 68-point landmark regressor and a 128-d
//! descriptor network on ONNX Runtime. Liveness is scored from landmark
//! geometry across a short frame history. Matching compares descriptors by
//! Euclidean distance.

pub mod adapter;
pub mod alignment;
pub mod detector;
pub mod enhance;
pub mod geometry;
pub mod landmarks;
pub mod liveness;
pub mod matcher;
pub mod onnx;
pub mod recognizer;
pub mod scrfd;
pub mod sensitivity;
pub mod types;

pub use adapter::{DetectOptions, DetectionAdapter};
pub use detector::{DetectorError, DetectorModel, FaceDetector};
pub use liveness::{BlinkTracker, BufferedFrame, FrameBuffer, LivenessAnalyzer, LivenessScore, TextureAnalyzer};
pub use matcher::{match_against_candidates, similarity, MatchError};
pub use onnx::{default_model_dir, OnnxFaceDetector};
pub use sensitivity::{SensitivityConfig, SensitivityError, SensitivityLevel, SensitivityProfile};
pub use types::{BoundingBox, Candidate, Descriptor, DetectionResult, LandmarkSet, MatchResult, Point};
