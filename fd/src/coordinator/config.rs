//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Attempts after the first failed publish before giving up
    #[serde(default = "default_publish_max_retries")]
    pub publish_max_retries: u32,

    /// Base backoff between publish attempts, doubled per attempt
    #[serde(default = "default_publish_backoff_ms")]
    pub publish_backoff_ms: u64,

    /// Upper bound on a single state store round-trip
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Interval of the recurring sweep (deadlines, liveness, recovery)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Silence after which an active participant is marked stale
    #[serde(default = "default_participant_timeout_secs")]
    pub participant_timeout_secs: u64,

    /// Buffered operator alerts per subscriber
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,
}

fn default_publish_max_retries() -> u32 {
    debug!("default_publish_max_retries: called");
    3
}

fn default_publish_backoff_ms() -> u64 {
    debug!("default_publish_backoff_ms: called");
    200
}

fn default_store_timeout_ms() -> u64 {
    debug!("default_store_timeout_ms: called");
    5000
}

fn default_sweep_interval_secs() -> u64 {
    debug!("default_sweep_interval_secs: called");
    5
}

fn default_participant_timeout_secs() -> u64 {
    debug!("default_participant_timeout_secs: called");
    300
}

fn default_alert_capacity() -> usize {
    debug!("default_alert_capacity: called");
    64
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            publish_max_retries: 3,
            publish_backoff_ms: 200,
            store_timeout_ms: 5000,
            sweep_interval_secs: 5,
            participant_timeout_secs: 300,
            alert_capacity: 64,
        }
    }
}

impl CoordinatorConfig {
    /// Backoff before retry `attempt` (1-based): `publish_backoff_ms * 2^(attempt-1)`
    pub fn publish_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.publish_backoff_ms.saturating_mul(factor))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        debug!(sweep_interval_secs = %self.sweep_interval_secs, "CoordinatorConfig::sweep_interval: called");
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Liveness window in milliseconds
    pub fn participant_timeout_ms(&self) -> i64 {
        i64::try_from(self.participant_timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.publish_max_retries, 3);
        assert_eq!(config.publish_backoff_ms, 200);
        assert_eq!(config.store_timeout_ms, 5000);
        assert_eq!(config.sweep_interval_secs, 5);
        assert_eq!(config.participant_timeout_secs, 300);
    }

    #[test]
    fn test_publish_backoff_doubles() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.publish_backoff(1), Duration::from_millis(200));
        assert_eq!(config.publish_backoff(2), Duration::from_millis(400));
        assert_eq!(config.publish_backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: CoordinatorConfig = serde_yaml::from_str("publish_max_retries: 7").unwrap();
        assert_eq!(config.publish_max_retries, 7);
        assert_eq!(config.store_timeout_ms, 5000);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(serde_yaml::from_str::<CoordinatorConfig>("publish_retries: 7").is_err());
    }
}
