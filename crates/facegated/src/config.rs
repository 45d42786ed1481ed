use facegate_core::adapter::DetectOptions;
use facegate_core::liveness::texture_analyzer_by_name;
use facegate_core::{DetectorModel, SensitivityLevel, SensitivityProfile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Config file read when `FACEGATE_CONFIG` is not set. Missing is fine.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/facegate/facegated.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Daemon configuration: optional TOML file, then `FACEGATE_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Sensitivity preset for new sessions.
    pub sensitivity: SensitivityLevel,
    /// Milliseconds between sampling ticks.
    pub sample_interval_ms: u64,
    /// Similarity a candidate must exceed when the caller passes no threshold.
    pub similarity_threshold: f32,
    /// Retry detection on an enhanced copy of the frame.
    pub enhance: bool,
    /// Retry detection at half resolution.
    pub fallback_to_low_res: bool,
    pub detector_model: DetectorModel,
    /// Texture signal: `none` or `luma`.
    pub texture_analyzer: String,
    /// Serve on the session bus instead of the system bus (development).
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            model_dir: facegate_core::default_model_dir(),
            sensitivity: SensitivityLevel::Medium,
            sample_interval_ms: 200,
            similarity_threshold: 0.40,
            enhance: true,
            fallback_to_low_res: true,
            detector_model: DetectorModel::Accurate,
            texture_analyzer: "none".to_string(),
            session_bus: false,
        }
    }
}

impl Config {
    /// Load the config file named by `FACEGATE_CONFIG` (or the default path),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("FACEGATE_CONFIG").ok();
        let path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut config = match Self::from_file(Path::new(&path)) {
            Ok(c) => {
                tracing::info!(path, "loaded config file");
                c
            }
            Err(ConfigError::Io { source, .. })
                if explicit.is_none() && source.kind() == std::io::ErrorKind::NotFound =>
            {
                Self::default()
            }
            Err(e) => return Err(e),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `FACEGATE_*` variables. Unparseable values are
    /// logged and ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FACEGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEGATE_TEXTURE_ANALYZER") {
            self.texture_analyzer = v;
        }
        override_parsed(&var, "FACEGATE_CAMERA_WIDTH", &mut self.camera_width);
        override_parsed(&var, "FACEGATE_CAMERA_HEIGHT", &mut self.camera_height);
        override_parsed(&var, "FACEGATE_SENSITIVITY", &mut self.sensitivity);
        override_parsed(&var, "FACEGATE_SAMPLE_INTERVAL_MS", &mut self.sample_interval_ms);
        override_parsed(&var, "FACEGATE_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        override_parsed(&var, "FACEGATE_DETECTOR_MODEL", &mut self.detector_model);
        override_flag(&var, "FACEGATE_ENHANCE", &mut self.enhance);
        override_flag(&var, "FACEGATE_LOW_RES_FALLBACK", &mut self.fallback_to_low_res);
        override_flag(&var, "FACEGATE_SESSION_BUS", &mut self.session_bus);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid("sample_interval_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold {} outside [0, 1]",
                self.similarity_threshold
            )));
        }
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err(ConfigError::Invalid("camera resolution must be non-zero".into()));
        }
        if texture_analyzer_by_name(&self.texture_analyzer).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown texture_analyzer {:?} (expected none or luma)",
                self.texture_analyzer
            )));
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Detection options for one sensitivity profile.
    pub fn detect_options(&self, profile: &SensitivityProfile) -> DetectOptions {
        DetectOptions {
            model: self.detector_model,
            min_confidence: profile.min_confidence,
            min_face_size: profile.min_face_size,
            enhance: self.enhance,
            fallback_to_low_res: self.fallback_to_low_res,
            ..DetectOptions::default()
        }
    }
}

fn override_parsed<T>(var: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *field = v,
        Err(e) => tracing::warn!(key, value = %raw, error = %e, "ignoring invalid environment override"),
    }
}

fn override_flag(var: &impl Fn(&str) -> Option<String>, key: &str, field: &mut bool) {
    if let Some(v) = var(key) {
        *field = !matches!(v.trim(), "0" | "false" | "no" | "off");
    }
}
