//! The face detector capability consumed by the pipeline.
//!
//! A detector takes one RGBA image and returns at most one primary face
//! with its 68 landmarks and identity descriptor. [`crate::onnx::OnnxFaceDetector`]
//! is the production implementation; tests substitute their own.

use crate::types::DetectionResult;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (place the ONNX models in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid input image: {0}")]
    InvalidInput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detector network variant, selectable per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorModel {
    /// Full-size network: slower, finds small and occluded faces.
    #[default]
    Accurate,
    /// Lightweight network for the live sampling loop.
    Tiny,
}

impl std::str::FromStr for DetectorModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accurate" => Ok(Self::Accurate),
            "tiny" => Ok(Self::Tiny),
            other => Err(format!("unknown detector model: {other} (expected accurate or tiny)")),
        }
    }
}

/// External face detection capability.
///
/// `Ok(None)` means the image contains no face at or above `min_confidence`;
/// errors are reserved for inference or decoding failures.
pub trait FaceDetector {
    fn detect(
        &mut self,
        image: &RgbaImage,
        model: DetectorModel,
        min_confidence: f32,
    ) -> Result<Option<DetectionResult>, DetectorError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(
        &mut self,
        image: &RgbaImage,
        model: DetectorModel,
        min_confidence: f32,
    ) -> Result<Option<DetectionResult>, DetectorError> {
        (**self).detect(image, model, min_confidence)
    }
}
