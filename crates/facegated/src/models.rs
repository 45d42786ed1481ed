use facegate_core::detector::{DetectorError, DetectorModel, FaceDetector};
use facegate_core::{DetectionResult, OnnxFaceDetector};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Loaded ONNX models, shared by every session the daemon creates.
#[derive(Clone)]
pub struct SharedDetector(Arc<Mutex<OnnxFaceDetector>>);

impl FaceDetector for SharedDetector {
    fn detect(
        &mut self,
        image: &RgbaImage,
        model: DetectorModel,
        min_confidence: f32,
    ) -> Result<Option<DetectionResult>, DetectorError> {
        let mut detector = self
            .0
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("detector lock poisoned".into()))?;
        detector.detect(image, model, min_confidence)
    }
}

/// Load all models from `model_dir` on a blocking thread.
pub async fn load(model_dir: PathBuf) -> Result<SharedDetector, DetectorError> {
    let started = std::time::Instant::now();
    let detector = tokio::task::spawn_blocking(move || OnnxFaceDetector::load(&model_dir))
        .await
        .map_err(|e| DetectorError::InferenceFailed(format!("model loader panicked: {e}")))??;
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "face models loaded");
    Ok(SharedDetector(Arc::new(Mutex::new(detector))))
}
