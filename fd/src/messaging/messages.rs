//! Wire messages exchanged over the federation topics

use serde::{Deserialize, Serialize};

use crate::domain::{AggregationPolicy, RoundId, RoundStatus, VersionNumber};

/// Why a contribution was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    UnknownRound,
    UnexpectedParticipant,
    DuplicateContribution,
    IntegrityMismatch,
    NotFound,
    Malformed,
    Timeout,
    Internal,
}

impl RejectReason {
    /// Rejections a client should retry rather than give up on
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Internal)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownRound => "unknown-round",
            Self::UnexpectedParticipant => "unexpected-participant",
            Self::DuplicateContribution => "duplicate-contribution",
            Self::IntegrityMismatch => "integrity-mismatch",
            Self::NotFound => "not-found",
            Self::Malformed => "malformed",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Result of a submission as reported back to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum ReceiptOutcome {
    Accepted { round_status: RoundStatus },
    Rejected { reason: RejectReason, message: String },
}

/// Everything that travels over the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum FederationMessage {
    /// A round opened; participants named here should train against `base_version`
    RoundStarted {
        round_id: RoundId,
        base_version: VersionNumber,
        base_ref: String,
        participants: Vec<String>,
        deadline: i64,
        policy: AggregationPolicy,
    },
    /// A round reached a terminal status
    RoundEnded {
        round_id: RoundId,
        status: RoundStatus,
        version: Option<VersionNumber>,
        payload_ref: Option<String>,
    },
    /// A participant's update, pointing at an uploaded delta
    ContributionSubmitted {
        request_id: String,
        round_id: RoundId,
        participant_id: String,
        payload_ref: String,
        content_hash: String,
        weight: f64,
    },
    /// Coordinator's answer to a `ContributionSubmitted`
    ContributionReceipt {
        request_id: String,
        round_id: RoundId,
        participant_id: String,
        outcome: ReceiptOutcome,
    },
    /// Edge liveness signal
    Heartbeat {
        participant_id: String,
        tier: String,
        sent_at: i64,
        local_version: Option<VersionNumber>,
    },
}

impl FederationMessage {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoundStarted { .. } => "round-started",
            Self::RoundEnded { .. } => "round-ended",
            Self::ContributionSubmitted { .. } => "contribution-submitted",
            Self::ContributionReceipt { .. } => "contribution-receipt",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn round_id(&self) -> Option<RoundId> {
        match self {
            Self::RoundStarted { round_id, .. }
            | Self::RoundEnded { round_id, .. }
            | Self::ContributionSubmitted { round_id, .. }
            | Self::ContributionReceipt { round_id, .. } => Some(*round_id),
            Self::Heartbeat { .. } => None,
        }
    }
}
