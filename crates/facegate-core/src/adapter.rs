//! Detection with fallbacks: original image, then an enhanced copy, then a
//! half-resolution copy whose results are mapped back to full resolution.

use crate::detector::{DetectorModel, FaceDetector};
use crate::enhance::{self, EnhanceOptions};
use crate::types::DetectionResult;
use image::RgbaImage;

/// Images must exceed this size for the low-resolution retry.
const LOW_RES_MIN_WIDTH: u32 = 320;
const LOW_RES_MIN_HEIGHT: u32 = 240;
const LOW_RES_FACTOR: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub model: DetectorModel,
    pub min_confidence: f32,
    /// Faces whose shorter box side is below this (in original pixels) are ignored.
    pub min_face_size: f32,
    pub enhance: bool,
    pub enhance_options: EnhanceOptions,
    pub fallback_to_low_res: bool,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            model: DetectorModel::Accurate,
            min_confidence: 0.5,
            min_face_size: 0.0,
            enhance: true,
            enhance_options: EnhanceOptions::default(),
            fallback_to_low_res: true,
        }
    }
}

/// Which attempt produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Original,
    Enhanced,
    LowRes,
}

pub struct DetectionAdapter<D> {
    detector: D,
}

impl<D: FaceDetector> DetectionAdapter<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Find the primary face in `image`, or `None`.
    ///
    /// A missing face is the common case and is not an error. Detector
    /// failures are logged and reported as `None`.
    pub fn detect_face(&mut self, image: &RgbaImage, options: &DetectOptions) -> Option<DetectionResult> {
        self.detect_face_with_attempt(image, options).map(|(det, _)| det)
    }

    pub fn detect_face_with_attempt(
        &mut self,
        image: &RgbaImage,
        options: &DetectOptions,
    ) -> Option<(DetectionResult, Attempt)> {
        if let Some(det) = self.try_detect(image, options, 1.0)? {
            return Some((det, Attempt::Original));
        }

        let (width, height) = image.dimensions();

        if options.enhance {
            let enhanced =
                enhance::enhance_for_detection(image.as_raw(), width, height, &options.enhance_options);
            if let Some(enhanced) = RgbaImage::from_raw(width, height, enhanced) {
                if let Some(det) = self.try_detect(&enhanced, options, 1.0)? {
                    tracing::debug!("face found on enhanced frame");
                    return Some((det, Attempt::Enhanced));
                }
            }
        }

        if options.fallback_to_low_res && width > LOW_RES_MIN_WIDTH && height > LOW_RES_MIN_HEIGHT {
            let small = image::imageops::resize(
                image,
                width / 2,
                height / 2,
                image::imageops::FilterType::Triangle,
            );
            if let Some(det) = self.try_detect(&small, options, LOW_RES_FACTOR)? {
                tracing::debug!("face found on half-resolution frame");
                return Some((det, Attempt::LowRes));
            }
        }

        None
    }

    /// One detector call. The outer `None` aborts the chain after a detector
    /// error; `Some(None)` means "no face, keep trying".
    fn try_detect(
        &mut self,
        image: &RgbaImage,
        options: &DetectOptions,
        rescale: f32,
    ) -> Option<Option<DetectionResult>> {
        match self.detector.detect(image, options.model, options.min_confidence) {
            Ok(Some(det)) => {
                let det = if rescale != 1.0 { det.scaled(rescale) } else { det };
                if det.bounding_box.min_side() < options.min_face_size {
                    tracing::trace!(
                        size = det.bounding_box.min_side(),
                        min = options.min_face_size,
                        "face below minimum size"
                    );
                    return Some(None);
                }
                Some(Some(det))
            }
            Ok(None) => Some(None),
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; treating frame as no face");
                None
            }
        }
    }
}
