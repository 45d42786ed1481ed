//! Face descriptor extractor via ONNX Runtime.
//!
//! Produces 128-dimensional identity descriptors from aligned 112×112 RGB
//! crops (MobileFaceNet-style network).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::detector::DetectorError;
use crate::types::{Descriptor, LandmarkSet, DESCRIPTOR_LEN};
use image::RgbaImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const DESCRIPTOR_MEAN: f32 = 127.5;
const DESCRIPTOR_STD: f32 = 128.0;
pub const DESCRIPTOR_MODEL_VERSION: &str = "mobilefacenet-128";

pub struct DescriptorExtractor {
    session: Session,
}

impl DescriptorExtractor {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded descriptor model");
        Ok(Self { session })
    }

    /// Align the face from its landmarks and extract an L2-normalized descriptor.
    pub fn extract(&mut self, image: &RgbaImage, landmarks: &LandmarkSet) -> Result<Descriptor, DetectorError> {
        let aligned = alignment::align_face(image, &landmarks.alignment_points());
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_LEN {
            return Err(DetectorError::InferenceFailed(format!(
                "expected {DESCRIPTOR_LEN}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor {
            values: l2_normalize(raw),
            model_version: Some(DESCRIPTOR_MODEL_VERSION.to_string()),
        })
    }
}

fn preprocess(aligned_rgb: &[u8]) -> Array4<f32> {
    let n = ALIGNED_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (i, px) in aligned_rgb.chunks_exact(3).enumerate().take(n * n) {
        let (y, x) = (i / n, i % n);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (px[c] as f32 - DESCRIPTOR_MEAN) / DESCRIPTOR_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
