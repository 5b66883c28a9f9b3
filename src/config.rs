use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::assets::{HEALTH_LOG_INTERVAL, MIN_FRAME_HEIGHT, MIN_FRAME_WIDTH, REDUNDANT_CAPTURE_GOAL};
use crate::error::ConfigError;
use crate::oracle::types::Size;

/// Tunables of the capture core that are not part of a session's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Extra captures of unchanged content before timer polling goes dormant.
    pub redundant_capture_goal: u32,
    /// Whether the platform reliably reports every content change.
    pub events_reliable: bool,
    /// Absolute floor for requested and maximum frame sizes.
    pub min_frame_size: Size,
    pub native_texture_supported: bool,
    pub health_log_interval_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            redundant_capture_goal: REDUNDANT_CAPTURE_GOAL,
            events_reliable: true,
            min_frame_size: Size::new(MIN_FRAME_WIDTH, MIN_FRAME_HEIGHT),
            native_texture_supported: false,
            health_log_interval_secs: HEALTH_LOG_INTERVAL.as_secs(),
        }
    }
}

impl OracleConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn health_log_interval(&self) -> Duration {
        Duration::from_secs(self.health_log_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = OracleConfig::from_json(r#"{ "redundant_capture_goal": 3 }"#).unwrap();
        assert_eq!(cfg.redundant_capture_goal, 3);
        assert!(cfg.events_reliable);
        assert_eq!(cfg.min_frame_size, Size::new(2, 2));
        assert!(!cfg.native_texture_supported);
    }

    #[test]
    fn test_full_json() {
        let json = r#"{
            "redundant_capture_goal": 10,
            "events_reliable": false,
            "min_frame_size": { "width": 16, "height": 16 },
            "native_texture_supported": true,
            "health_log_interval_secs": 5
        }"#;
        let cfg = OracleConfig::from_json(json).unwrap();
        assert_eq!(cfg.redundant_capture_goal, 10);
        assert!(!cfg.events_reliable);
        assert_eq!(cfg.min_frame_size, Size::new(16, 16));
        assert!(cfg.native_texture_supported);
        assert_eq!(cfg.health_log_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            OracleConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            OracleConfig::load("/nonexistent/frame-oracle.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
