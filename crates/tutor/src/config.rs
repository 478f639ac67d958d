use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Aggregation {
    Latest,
    Best,
    Average,
}

/// Policy knobs fixed for the lifetime of one controller.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub pass_threshold: f32,
    pub max_attempts: u32,
    pub auto_advance: bool,
    pub aggregation: Aggregation,
    /// Pause after a completed segment before auto-advancing.
    pub settle_delay_ms: u64,
    /// Minimum spacing of progress-only snapshots.
    pub progress_throttle_ms: u64,
    /// Captured buffers held before the oldest is dropped.
    pub audio_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.6,
            max_attempts: 3,
            auto_advance: true,
            aggregation: Aggregation::Best,
            settle_delay_ms: 1_000,
            progress_throttle_ms: 50,
            audio_queue_capacity: 32,
        }
    }
}

impl SessionConfig {
    pub fn from_yaml(text: &str) -> Result<Self, SessionError> {
        let config: SessionConfig = serde_yaml::from_str(text)
            .map_err(|err| SessionError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| SessionError::InvalidConfig(format!("read {:?}: {}", path, err)))?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if !(0.0..=1.0).contains(&self.pass_threshold) {
            return Err(SessionError::InvalidConfig(
                "pass_threshold must be within [0, 1]".into(),
            ));
        }
        if self.max_attempts < 1 {
            return Err(SessionError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.audio_queue_capacity < 1 {
            return Err(SessionError::InvalidConfig(
                "audio_queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn progress_throttle(&self) -> Duration {
        Duration::from_millis(self.progress_throttle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.settle_delay(), Duration::from_secs(1));
    }

    #[test]
    fn yaml_fills_missing_fields() {
        let config = SessionConfig::from_yaml("auto_advance: false\naggregation: Average\n").unwrap();
        assert!(!config.auto_advance);
        assert_eq!(config.aggregation, Aggregation::Average);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(SessionConfig::from_yaml("pass_threshold: 1.5").is_err());
        assert!(SessionConfig::from_yaml("max_attempts: 0").is_err());
        assert!(SessionConfig::from_yaml("audio_queue_capacity: 0").is_err());
        assert!(SessionConfig::from_yaml("aggregation: Median").is_err());
    }
}
