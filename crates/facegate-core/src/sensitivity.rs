//! Named sensitivity presets controlling liveness and detection thresholds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensitivityError {
    #[error("unknown sensitivity level: {0:?} (expected low, medium or high)")]
    UnknownLevel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl SensitivityLevel {
    pub const ALL: [SensitivityLevel; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn profile(self) -> SensitivityProfile {
        match self {
            Self::Low => SensitivityProfile {
                level: self,
                liveness_threshold: 0.40,
                blink_threshold: 0.10,
                movement_threshold: 0.05,
                symmetry_threshold: 0.98,
                min_confidence: 0.30,
                min_face_size: 60.0,
            },
            Self::Medium => SensitivityProfile {
                level: self,
                liveness_threshold: 0.50,
                blink_threshold: 0.12,
                movement_threshold: 0.10,
                symmetry_threshold: 0.95,
                min_confidence: 0.50,
                min_face_size: 80.0,
            },
            Self::High => SensitivityProfile {
                level: self,
                liveness_threshold: 0.70,
                blink_threshold: 0.15,
                movement_threshold: 0.20,
                symmetry_threshold: 0.92,
                min_confidence: 0.70,
                min_face_size: 100.0,
            },
        }
    }
}

impl fmt::Display for SensitivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensitivityLevel {
    type Err = SensitivityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(SensitivityError::UnknownLevel(s.to_string())),
        }
    }
}

/// Thresholds read by detection and liveness scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityProfile {
    pub level: SensitivityLevel,
    /// Minimum combined liveness score for a live verdict.
    pub liveness_threshold: f32,
    /// EAR above which eyes count as open; also the minimum EAR swing for a blink.
    pub blink_threshold: f32,
    /// Mean key-point displacement (px) at or below which a face counts as static.
    pub movement_threshold: f32,
    /// Symmetry score at or above which a face looks like a flat photo.
    pub symmetry_threshold: f32,
    /// Detector confidence floor.
    pub min_confidence: f32,
    /// Smallest accepted face box side, in pixels.
    pub min_face_size: f32,
}

impl Default for SensitivityProfile {
    fn default() -> Self {
        SensitivityLevel::default().profile()
    }
}

/// The selected sensitivity of one capture session.
#[derive(Debug, Clone, Default)]
pub struct SensitivityConfig {
    level: SensitivityLevel,
}

impl SensitivityConfig {
    pub fn new(level: SensitivityLevel) -> Self {
        Self { level }
    }

    /// Select a preset by name. Unknown names leave the current level unchanged.
    pub fn set_level(&mut self, name: &str) -> Result<SensitivityLevel, SensitivityError> {
        let level: SensitivityLevel = name.parse()?;
        if level != self.level {
            tracing::info!(from = %self.level, to = %level, "sensitivity changed");
        }
        self.level = level;
        Ok(level)
    }

    pub fn level(&self) -> SensitivityLevel {
        self.level
    }

    /// Snapshot of the active thresholds.
    pub fn current(&self) -> SensitivityProfile {
        self.level.profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels_case_insensitive() {
        assert_eq!("LOW".parse::<SensitivityLevel>(), Ok(SensitivityLevel::Low));
        assert_eq!(" medium ".parse::<SensitivityLevel>(), Ok(SensitivityLevel::Medium));
        assert_eq!("High".parse::<SensitivityLevel>(), Ok(SensitivityLevel::High));
    }

    #[test]
    fn test_unknown_level_rejected_and_unchanged() {
        let mut cfg = SensitivityConfig::new(SensitivityLevel::High);
        assert_eq!(
            cfg.set_level("paranoid"),
            Err(SensitivityError::UnknownLevel("paranoid".into()))
        );
        assert_eq!(cfg.level(), SensitivityLevel::High);
    }

    #[test]
    fn test_set_level_switches_profile() {
        let mut cfg = SensitivityConfig::default();
        assert_eq!(cfg.current().liveness_threshold, 0.5);
        cfg.set_level("high").unwrap();
        assert_eq!(cfg.current(), SensitivityLevel::High.profile());
    }

    #[test]
    fn test_current_is_a_snapshot() {
        let cfg = SensitivityConfig::default();
        let mut snapshot = cfg.current();
        snapshot.liveness_threshold = 0.0;
        assert_eq!(cfg.current().liveness_threshold, 0.5);
    }

    #[test]
    fn test_presets_monotonic() {
        let [low, med, high] = SensitivityLevel::ALL.map(SensitivityLevel::profile);
        assert!(low.liveness_threshold < med.liveness_threshold);
        assert!(med.liveness_threshold < high.liveness_threshold);
        assert!(low.min_confidence < high.min_confidence);
        assert!(low.symmetry_threshold > high.symmetry_threshold);
    }

    #[test]
    fn test_profile_serializes_level_name() {
        let json = serde_json::to_value(SensitivityLevel::Low.profile()).unwrap();
        assert_eq!(json["level"], "low");
    }
}
