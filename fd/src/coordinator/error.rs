//! Coordinator error types

use thiserror::Error;

use crate::aggregation::AggregationError;
use crate::domain::RoundId;
use crate::messaging::{BusError, RejectReason};
use crate::state::StateError;

/// Errors surfaced by coordinator operations
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Unknown or closed round {0}")]
    UnknownRound(RoundId),

    #[error("Participant {participant_id} is not eligible for round {round_id}")]
    UnexpectedParticipant { round_id: RoundId, participant_id: String },

    #[error("Participant {participant_id} already contributed to round {round_id}")]
    DuplicateContribution { round_id: RoundId, participant_id: String },

    #[error("Integrity mismatch: claimed {claimed}, payload hashes to {actual}")]
    IntegrityMismatch { claimed: String, actual: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed contribution: {0}")]
    Malformed(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Round {round_id} failed: {reason}")]
    Failed { round_id: RoundId, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl CoordError {
    /// Errors that leave state untouched and may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        match self {
            CoordError::Timeout(_) | CoordError::Store(_) => true,
            CoordError::Bus(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Rejection reason reported to a submitting client
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            CoordError::UnknownRound(_) | CoordError::Failed { .. } => RejectReason::UnknownRound,
            CoordError::UnexpectedParticipant { .. } => RejectReason::UnexpectedParticipant,
            CoordError::DuplicateContribution { .. } => RejectReason::DuplicateContribution,
            CoordError::IntegrityMismatch { .. } => RejectReason::IntegrityMismatch,
            CoordError::NotFound(_) => RejectReason::NotFound,
            CoordError::Malformed(_) | CoordError::InvalidPolicy(_) => RejectReason::Malformed,
            CoordError::Timeout(_) => RejectReason::Timeout,
            CoordError::InvalidState(_) | CoordError::Store(_) | CoordError::Bus(_) => RejectReason::Internal,
        }
    }
}

impl From<StateError> for CoordError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => CoordError::NotFound(what),
            StateError::Duplicate {
                round_id,
                participant_id,
            } => CoordError::DuplicateContribution {
                round_id,
                participant_id,
            },
            StateError::RoundClosed { round_id, .. } => CoordError::UnknownRound(round_id),
            StateError::IllegalTransition { from, to } => {
                CoordError::InvalidState(format!("illegal transition {} -> {}", from, to))
            }
            other => CoordError::Store(other.to_string()),
        }
    }
}

impl From<modelstore::StoreError> for CoordError {
    fn from(e: modelstore::StoreError) -> Self {
        match e {
            modelstore::StoreError::NotFound(reference) | modelstore::StoreError::InvalidRef(reference) => {
                CoordError::NotFound(format!("payload {}", reference))
            }
            modelstore::StoreError::Corrupt { reference, actual } => CoordError::IntegrityMismatch {
                claimed: reference,
                actual,
            },
            modelstore::StoreError::Io(e) => CoordError::Store(e.to_string()),
        }
    }
}

impl From<AggregationError> for CoordError {
    fn from(e: AggregationError) -> Self {
        CoordError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoundStatus;

    #[test]
    fn test_state_error_mapping() {
        let dup: CoordError = StateError::Duplicate {
            round_id: 1,
            participant_id: "edge-a".into(),
        }
        .into();
        assert!(matches!(dup, CoordError::DuplicateContribution { round_id: 1, .. }));

        let closed: CoordError = StateError::RoundClosed {
            round_id: 4,
            status: RoundStatus::Expired,
        }
        .into();
        assert!(matches!(closed, CoordError::UnknownRound(4)));

        let channel: CoordError = StateError::ChannelError.into();
        assert!(channel.is_transient());
    }

    #[test]
    fn test_store_error_mapping() {
        let missing: CoordError = modelstore::StoreError::NotFound("sha256:00".into()).into();
        assert_eq!(missing.reject_reason(), RejectReason::NotFound);
    }

    #[test]
    fn test_reject_reasons() {
        assert_eq!(
            CoordError::IntegrityMismatch {
                claimed: "a".into(),
                actual: "b".into()
            }
            .reject_reason(),
            RejectReason::IntegrityMismatch
        );
        assert_eq!(CoordError::Timeout("store".into()).reject_reason(), RejectReason::Timeout);
        assert!(!CoordError::Malformed("x".into()).is_transient());
        assert!(CoordError::Bus(BusError::Timeout("t".into())).is_transient());
        assert!(!CoordError::Bus(BusError::UnknownTopic("t".into())).is_transient());
    }
}
