//! 68-point landmark regressor via ONNX Runtime.
//!
//! Crops the detected box (expanded by 10 % per side), resizes it to the
//! network input and maps the normalized output coordinates back into the
//! source image.

use crate::detector::DetectorError;
use crate::types::{BoundingBox, LandmarkSet, Point, LANDMARK_COUNT};
use image::RgbaImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const LANDMARK_INPUT_SIZE: u32 = 112;
const CROP_MARGIN: f32 = 0.1;

pub struct LandmarkRegressor {
    session: Session,
}

/// Square crop region in source pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Crop {
    x: u32,
    y: u32,
    size: u32,
}

impl LandmarkRegressor {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded 68-point landmark model");
        Ok(Self { session })
    }

    pub fn predict(&mut self, image: &RgbaImage, face: &BoundingBox) -> Result<LandmarkSet, DetectorError> {
        let crop = crop_region(face, image.width(), image.height())
            .ok_or_else(|| DetectorError::InvalidInput("face box lies outside the image".into()))?;

        let patch = image::imageops::crop_imm(image, crop.x, crop.y, crop.size, crop.size).to_image();
        let patch = image::imageops::resize(
            &patch,
            LANDMARK_INPUT_SIZE,
            LANDMARK_INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let input = to_tensor(&patch);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("landmark extraction: {e}")))?;

        decode(raw, crop)
    }
}

/// Expand the box by [`CROP_MARGIN`], square it and clip to the image.
fn crop_region(face: &BoundingBox, width: u32, height: u32) -> Option<Crop> {
    let side = face.width.max(face.height) * (1.0 + 2.0 * CROP_MARGIN);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x0 = (cx - side / 2.0).max(0.0).floor() as u32;
    let y0 = (cy - side / 2.0).max(0.0).floor() as u32;
    if x0 >= width || y0 >= height {
        return None;
    }
    let size = (side.round() as u32).min(width - x0).min(height - y0);
    (size >= 2).then_some(Crop { x: x0, y: y0, size })
}

fn to_tensor(patch: &RgbaImage) -> Array4<f32> {
    let n = LANDMARK_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, px) in patch.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Convert 136 normalized `[x0, y0, x1, y1, ...]` values to image coordinates.
fn decode(raw: &[f32], crop: Crop) -> Result<LandmarkSet, DetectorError> {
    if raw.len() < LANDMARK_COUNT * 2 {
        return Err(DetectorError::InferenceFailed(format!(
            "expected {} landmark values, got {}",
            LANDMARK_COUNT * 2,
            raw.len()
        )));
    }
    let size = crop.size as f32;
    let points: [Point; LANDMARK_COUNT] = std::array::from_fn(|i| {
        Point::new(
            crop.x as f32 + raw[i * 2] * size,
            crop.y as f32 + raw[i * 2 + 1] * size,
        )
    });
    Ok(LandmarkSet::new(points))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_region_expands_and_squares() {
        let face = BoundingBox { x: 100.0, y: 100.0, width: 100.0, height: 80.0 };
        let crop = crop_region(&face, 640, 480).unwrap();
        assert_eq!(crop.size, 120);
        assert_eq!(crop.x, 90);
        assert_eq!(crop.y, 80);
    }

    #[test]
    fn test_crop_region_clipped_at_border() {
        let face = BoundingBox { x: -20.0, y: 400.0, width: 100.0, height: 100.0 };
        let crop = crop_region(&face, 640, 480).unwrap();
        assert_eq!(crop.x, 0);
        assert!(crop.y + crop.size <= 480);
    }

    #[test]
    fn test_crop_region_outside_image() {
        let face = BoundingBox { x: 900.0, y: 10.0, width: 50.0, height: 50.0 };
        assert!(crop_region(&face, 640, 480).is_none());
    }

    #[test]
    fn test_decode_maps_into_crop() {
        let raw: Vec<f32> = (0..LANDMARK_COUNT).flat_map(|_| [0.5f32, 0.25]).collect();
        let set = decode(&raw, Crop { x: 10, y: 20, size: 100 }).unwrap();
        assert_eq!(set.get(0), Point::new(60.0, 45.0));
        assert_eq!(set.get(67), Point::new(60.0, 45.0));
    }

    #[test]
    fn test_decode_rejects_short_output() {
        assert!(decode(&[0.0; 10], Crop { x: 0, y: 0, size: 10 }).is_err());
    }
}
