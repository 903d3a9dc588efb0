//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables for one `TaskQueue`.
///
/// Durations are written in milliseconds when (de)serialized:
///
/// ```toml
/// default_max_attempts = 3
/// reap_timeout_ms = 30000
/// reap_interval_ms = 5000
/// max_outstanding = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Used when `enqueue` is called without an explicit ceiling.
    pub default_max_attempts: u32,

    /// A claim older than this (since claim or last heartbeat) is a zombie.
    #[serde(rename = "reap_timeout_ms", with = "duration_ms")]
    pub reap_timeout: Duration,

    /// How often the reaper sweeps.
    #[serde(rename = "reap_interval_ms", with = "duration_ms")]
    pub reap_interval: Duration,

    /// Bound on queued + in-flight tasks. `None` = unbounded.
    pub max_outstanding: Option<usize>,
}

impl QueueConfig {
    pub fn new(default_max_attempts: u32, reap_timeout: Duration, reap_interval: Duration) -> Self {
        Self {
            default_max_attempts,
            reap_timeout,
            reap_interval,
            max_outstanding: None,
        }
    }

    pub fn with_max_outstanding(mut self, limit: usize) -> Self {
        self.max_outstanding = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        if self.reap_timeout.is_zero() {
            return Err(ConfigError::ZeroReapTimeout);
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::ZeroReapInterval);
        }
        if self.max_outstanding == Some(0) {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30), Duration::from_secs(5))
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.default_max_attempts, 3);
        assert_eq!(cfg.reap_timeout, Duration::from_secs(30));
        assert_eq!(cfg.reap_interval, Duration::from_secs(5));
        assert_eq!(cfg.max_outstanding, None);
        assert!(cfg.validate().is_ok());
    }

    #[rstest]
    #[case(QueueConfig::new(0, Duration::from_secs(1), Duration::from_secs(1)), ConfigError::ZeroMaxAttempts)]
    #[case(QueueConfig::new(1, Duration::ZERO, Duration::from_secs(1)), ConfigError::ZeroReapTimeout)]
    #[case(QueueConfig::new(1, Duration::from_secs(1), Duration::ZERO), ConfigError::ZeroReapInterval)]
    #[case(QueueConfig::default().with_max_outstanding(0), ConfigError::ZeroCapacity)]
    fn invalid_configs_are_rejected(#[case] cfg: QueueConfig, #[case] expected: ConfigError) {
        assert_eq!(cfg.validate(), Err(expected));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: QueueConfig =
            serde_json::from_str(r#"{ "reap_timeout_ms": 250, "max_outstanding": 8 }"#).unwrap();
        assert_eq!(cfg.reap_timeout, Duration::from_millis(250));
        assert_eq!(cfg.reap_interval, Duration::from_secs(5));
        assert_eq!(cfg.default_max_attempts, 3);
        assert_eq!(cfg.max_outstanding, Some(8));
    }
}
