//! ONNX Runtime implementation of [`FaceDetector`].
//!
//! Chains SCRFD box detection, 68-point landmark regression and descriptor
//! extraction. Model files are looked up by name in one directory.

use crate::detector::{DetectorError, DetectorModel, FaceDetector};
use crate::landmarks::LandmarkRegressor;
use crate::recognizer::DescriptorExtractor;
use crate::scrfd::ScrfdDetector;
use crate::types::DetectionResult;
use image::RgbaImage;
use std::path::{Path, PathBuf};

pub const ACCURATE_DETECTOR_FILE: &str = "det_10g.onnx";
pub const TINY_DETECTOR_FILE: &str = "det_500m.onnx";
pub const LANDMARK_MODEL_FILE: &str = "landmarks_68.onnx";
pub const DESCRIPTOR_MODEL_FILE: &str = "descriptor_128.onnx";

/// Default model directory (`/var/lib/facegate/models`).
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/var/lib/facegate/models")
}

pub struct OnnxFaceDetector {
    accurate: ScrfdDetector,
    /// `None` when the tiny model is not installed; requests fall back to `accurate`.
    tiny: Option<ScrfdDetector>,
    landmarks: LandmarkRegressor,
    descriptor: DescriptorExtractor,
}

impl OnnxFaceDetector {
    /// Load all models from `model_dir`. Only the tiny detector is optional.
    pub fn load(model_dir: &Path) -> Result<Self, DetectorError> {
        let accurate = ScrfdDetector::load(&model_dir.join(ACCURATE_DETECTOR_FILE))?;

        let tiny = match ScrfdDetector::load(&model_dir.join(TINY_DETECTOR_FILE)) {
            Ok(d) => Some(d),
            Err(DetectorError::ModelNotFound(path)) => {
                tracing::warn!(%path, "tiny detector not installed; using the accurate model for all requests");
                None
            }
            Err(e) => return Err(e),
        };

        let landmarks = LandmarkRegressor::load(&model_dir.join(LANDMARK_MODEL_FILE))?;
        let descriptor = DescriptorExtractor::load(&model_dir.join(DESCRIPTOR_MODEL_FILE))?;

        Ok(Self {
            accurate,
            tiny,
            landmarks,
            descriptor,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(
        &mut self,
        image: &RgbaImage,
        model: DetectorModel,
        min_confidence: f32,
    ) -> Result<Option<DetectionResult>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::InvalidInput("empty image".into()));
        }

        let boxes = match (model, self.tiny.as_mut()) {
            (DetectorModel::Tiny, Some(tiny)) => tiny.detect(image, min_confidence)?,
            _ => self.accurate.detect(image, min_confidence)?,
        };

        let Some(primary) = boxes.into_iter().next() else {
            return Ok(None);
        };

        let landmarks = self.landmarks.predict(image, &primary.bbox)?;
        let descriptor = self.descriptor.extract(image, &landmarks)?;

        Ok(Some(DetectionResult {
            bounding_box: primary.bbox,
            landmarks,
            descriptor,
            confidence: primary.confidence,
        }))
    }
}
