//! Edge client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::Tier;

/// Configuration for an edge client session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    /// Participant id this node registers under
    #[serde(default = "default_participant_id")]
    pub participant_id: String,

    /// Deployment tier (tier2 or tier3)
    #[serde(default)]
    pub tier: Tier,

    /// External training program; when unset a synthetic trainer is used
    #[serde(default)]
    pub trainer_command: Option<String>,

    /// Submission attempts after the first before giving up
    #[serde(default = "default_submit_max_retries")]
    pub submit_max_retries: u32,

    /// Base backoff between submission attempts
    #[serde(default = "default_submit_backoff_ms")]
    pub submit_backoff_ms: u64,

    /// Time spent in Error before returning to Idle
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Heartbeat period on the telemetry topic
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_participant_id() -> String {
    "edge-001".to_string()
}

fn default_submit_max_retries() -> u32 {
    3
}

fn default_submit_backoff_ms() -> u64 {
    200
}

fn default_cooldown_secs() -> u64 {
    10
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            participant_id: default_participant_id(),
            tier: Tier::Tier2,
            trainer_command: None,
            submit_max_retries: 3,
            submit_backoff_ms: 200,
            cooldown_secs: 10,
            heartbeat_secs: 30,
        }
    }
}

impl EdgeConfig {
    /// Build a config for a named participant with defaults elsewhere
    pub fn for_participant(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            ..Self::default()
        }
    }

    /// Backoff before submission retry `attempt` (1-based)
    pub fn submit_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.submit_backoff_ms.saturating_mul(factor))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}
