//! SCRFD face box detector via ONNX Runtime.
//!
//! 3-stride anchor-free decoding with letterbox de-mapping and NMS. Used by
//! [`crate::onnx::OnnxFaceDetector`] to locate the primary face before
//! landmark regression.

use crate::detector::DetectorError;
use crate::types::BoundingBox;
use image::RgbaImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// A raw SCRFD box before landmark regression.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> (Self, usize, usize) {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, target);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, target);
        let lb = Self {
            scale,
            pad_x: (target - new_w) as f32 / 2.0,
            pad_y: (target - new_h) as f32 / 2.0,
        };
        (lb, new_w, new_h)
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox).
type StrideOutputs = (usize, usize);

pub struct ScrfdDetector {
    session: Session,
    strides: [StrideOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = %model_path.display(), outputs = ?names, "loaded SCRFD model");

        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                names.len()
            )));
        }

        Ok(Self {
            session,
            strides: output_indices(&names),
        })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, image: &RgbaImage, threshold: f32) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.strides[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            all.extend(decode_stride(scores, bboxes, stride, &letterbox, threshold));
        }

        Ok(nms(all, SCRFD_NMS_THRESHOLD))
    }
}

/// Map named outputs ("score_8", "bbox_8", ...) to stride slots, falling back
/// to the standard positional layout [scores 8/16/32, bboxes 8/16/32, ...].
fn output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut named = [(0, 0); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(s), Some(b)) => named[slot] = (s, b),
            _ => {
                tracing::debug!(?names, "SCRFD: positional output mapping");
                return [(0, 3), (1, 4), (2, 5)];
            }
        }
    }
    named
}

/// Letterbox the RGB channels into a 640×640 NCHW tensor.
fn preprocess(image: &RgbaImage) -> (Array4<f32>, Letterbox) {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let (letterbox, new_w, new_h) = Letterbox::fit(w.max(1), h.max(1), SCRFD_INPUT_SIZE);

    let resized = image::imageops::resize(
        image,
        new_w as u32,
        new_h as u32,
        image::imageops::FilterType::Triangle,
    );

    let pad_x = letterbox.pad_x.floor() as usize;
    let pad_y = letterbox.pad_y.floor() as usize;
    // Padding is the mean value so it normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));

    for (x, y, px) in resized.enumerate_pixels() {
        let tx = x as usize + pad_x;
        let ty = y as usize + pad_y;
        if tx >= SCRFD_INPUT_SIZE || ty >= SCRFD_INPUT_SIZE {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = scores.get(idx).copied().unwrap_or(0.0);
            if score < threshold {
                return None;
            }
            let off = idx * 4;
            let d = bboxes.get(off..off + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * s;
            let ay = (cell / grid_w) as f32 * s;

            let (x1, y1) = letterbox.unmap(ax - d[0] * s, ay - d[1] * s);
            let (x2, y2) = letterbox.unmap(ax + d[2] * s, ay + d[3] * s);

            Some(FaceBox {
                bbox: BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                },
                confidence: score,
            })
        })
        .collect()
}

/// Non-maximum suppression; output sorted by descending confidence.
fn nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
