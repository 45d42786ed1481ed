use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

use facegate_core::liveness::texture_analyzer_by_name;
use facegate_core::{Candidate, SensitivityLevel};
use facegate_hw::Camera;

use crate::config::Config;
use crate::models::{self, SharedDetector};
use crate::session::{CaptureError, CaptureSession, SessionOptions};

pub const BUS_NAME: &str = "org.facegate.FaceGate1";
pub const OBJECT_PATH: &str = "/org/facegate/FaceGate1";

pub type DaemonSession = CaptureSession<Camera, SharedDetector>;

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    /// `None` while the models failed to load; see `model_error`.
    pub models: Option<SharedDetector>,
    pub model_error: Option<String>,
    pub session: Option<Arc<DaemonSession>>,
}

impl AppState {
    pub fn new(config: Config, models: Result<SharedDetector, String>) -> Self {
        let (models, model_error) = match models {
            Ok(m) => (Some(m), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            config,
            models,
            model_error,
            session: None,
        }
    }

    fn active_session(&self) -> Result<Arc<DaemonSession>, CaptureError> {
        self.session
            .as_ref()
            .filter(|s| s.is_active())
            .cloned()
            .ok_or(CaptureError::SessionNotStarted)
    }

    /// The current session, running or ended by a camera failure.
    fn current_session(&self) -> Result<Arc<DaemonSession>, CaptureError> {
        self.session.clone().ok_or(CaptureError::SessionNotStarted)
    }

    fn sensitivity_profile(&self) -> facegate_core::SensitivityProfile {
        match &self.session {
            Some(s) if s.is_active() => s.sensitivity(),
            _ => self.config.sensitivity.profile(),
        }
    }
}

/// D-Bus errors carry the reason code as a prefix: `"NoFaceDetected: no face detected"`.
fn to_fdo(e: CaptureError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {e}", e.reason()))
}

/// `None` for a negative threshold (use the configured default).
fn parse_threshold(threshold: f64) -> zbus::fdo::Result<Option<f32>> {
    if !threshold.is_finite() {
        return Err(zbus::fdo::Error::InvalidArgs(format!("threshold must be finite, got {threshold}")));
    }
    Ok((threshold >= 0.0).then_some(threshold as f32))
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// D-Bus interface for the facegate daemon.
///
/// Bus name: org.facegate.FaceGate1
/// Object path: /org/facegate/FaceGate1
pub struct FaceGateService {
    pub state: Arc<Mutex<AppState>>,
}

#[interface(name = "org.facegate.FaceGate1")]
impl FaceGateService {
    /// Open the camera and start liveness sampling. Returns the session ID.
    ///
    /// Calling this while a session is running returns the running session's ID.
    async fn start_session(&self) -> zbus::fdo::Result<String> {
        let mut state = self.state.lock().await;

        if let Ok(session) = state.active_session() {
            return Ok(session.id().to_string());
        }

        let Some(detector) = state.models.clone() else {
            let detail = state
                .model_error
                .clone()
                .unwrap_or_else(|| "models not loaded".to_string());
            return Err(to_fdo(CaptureError::ModelUnavailable(detail)));
        };

        let config = &state.config;
        let camera = Camera::new(config.camera_device.clone(), config.camera_width, config.camera_height);
        let options = SessionOptions {
            sample_interval: config.sample_interval(),
            detect: config.detect_options(&config.sensitivity.profile()),
            sensitivity: config.sensitivity,
        };
        let texture = texture_analyzer_by_name(&config.texture_analyzer)
            .ok_or_else(|| zbus::fdo::Error::Failed(format!("unknown texture analyzer {}", config.texture_analyzer)))?;

        let session = Arc::new(CaptureSession::with_texture(camera, detector, options, texture));
        session.start().await.map_err(|e| {
            tracing::error!(error = %e, reason = e.reason(), "start_session failed");
            to_fdo(e)
        })?;

        let id = session.id().to_string();
        state.session = Some(session);
        tracing::info!(session = %id, "session started over D-Bus");
        Ok(id)
    }

    /// Stop the running session and release the camera. Returns false if none was running.
    async fn stop_session(&self) -> zbus::fdo::Result<bool> {
        let session = self.state.lock().await.session.take();
        match session {
            Some(s) => {
                s.stop().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Capture a fresh frame and match it against `candidates_json`
    /// (a JSON array of `{ "id", "descriptor": { "values", "model_version" } }`).
    ///
    /// A negative `threshold` uses the configured default.
    async fn capture(&self, candidates_json: &str, threshold: f64) -> zbus::fdo::Result<String> {
        let threshold = parse_threshold(threshold)?;
        let candidates: Vec<Candidate> = if candidates_json.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(candidates_json)
                .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("candidates: {e}")))?
        };

        // Copy what we need while holding the lock, then release it.
        let (session, default_threshold) = {
            let state = self.state.lock().await;
            (state.current_session().map_err(to_fdo)?, state.config.similarity_threshold)
        };
        let threshold = threshold.unwrap_or(default_threshold);

        let outcome = session.capture(candidates, threshold).await.map_err(|e| {
            tracing::info!(reason = e.reason(), error = %e, "capture rejected");
            to_fdo(e)
        })?;
        to_json(&outcome)
    }

    /// Switch the sensitivity preset (`low`, `medium`, `high`).
    ///
    /// Applies to the running session and to sessions started later.
    async fn set_sensitivity_level(&self, level: &str) -> zbus::fdo::Result<String> {
        let parsed: SensitivityLevel = level
            .parse()
            .map_err(|e: facegate_core::SensitivityError| zbus::fdo::Error::InvalidArgs(e.to_string()))?;

        let mut state = self.state.lock().await;
        if let Some(session) = &state.session {
            session
                .set_sensitivity(level)
                .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        }
        state.config.sensitivity = parsed;
        to_json(&state.sensitivity_profile())
    }

    async fn get_current_sensitivity(&self) -> zbus::fdo::Result<String> {
        let state = self.state.lock().await;
        to_json(&state.sensitivity_profile())
    }

    /// Latest liveness verdict of the running session.
    async fn liveness_status(&self) -> zbus::fdo::Result<String> {
        let session = self.state.lock().await.current_session().map_err(to_fdo)?;
        to_json(&session.liveness())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = self.state.lock().await;
        let session = state.session.as_ref().map(|s| {
            serde_json::json!({
                "id": s.id().to_string(),
                "state": s.state(),
            })
        });
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": state.config.camera_device,
            "models_loaded": state.models.is_some(),
            "model_error": state.model_error,
            "model_dir": state.config.model_dir.display().to_string(),
            "sensitivity": state.config.sensitivity,
            "session": session,
        })
        .to_string())
    }

    /// Retry loading the face models. A running session keeps its current models.
    async fn reload_models(&self) -> zbus::fdo::Result<bool> {
        let model_dir = self.state.lock().await.config.model_dir.clone();
        let loaded = models::load(model_dir).await;

        let mut state = self.state.lock().await;
        match loaded {
            Ok(detector) => {
                state.models = Some(detector);
                state.model_error = None;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "model reload failed");
                state.model_error = Some(e.to_string());
                Err(to_fdo(CaptureError::ModelUnavailable(e.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_parsing() {
        assert_eq!(parse_threshold(0.6).unwrap(), Some(0.6));
        assert_eq!(parse_threshold(0.0).unwrap(), Some(0.0));
        assert_eq!(parse_threshold(-1.0).unwrap(), None);
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(parse_threshold(bad), Err(zbus::fdo::Error::InvalidArgs(_))));
        }
    }

    #[test]
    fn test_error_carries_reason_prefix() {
        match to_fdo(CaptureError::NoFaceDetected) {
            zbus::fdo::Error::Failed(msg) => assert_eq!(msg, "NoFaceDetected: no face detected"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
