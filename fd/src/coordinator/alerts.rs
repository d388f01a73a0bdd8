//! Operator alerts
//!
//! Per-round failures never crash the coordinator; they are surfaced here for
//! whoever is watching (the CLI logs them, tests assert on them).

use serde::{Deserialize, Serialize};

use crate::domain::RoundId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    /// Round-start publish exhausted its retries; round marked Failed
    AnnounceFailed,
    /// Round-end publish failed after the round was already terminal
    RoundEndUnpublished,
    /// Aggregation raised a non-transient error; round marked Failed
    AggregationFailed,
    /// Deadline passed with no contributions
    RoundExpired,
    /// Operator cancelled the round
    RoundCancelled,
}

/// An event an operator should know about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub kind: AlertKind,
    pub round_id: Option<RoundId>,
    pub message: String,
    /// When the alert was raised (Unix milliseconds)
    pub raised_at: i64,
}
