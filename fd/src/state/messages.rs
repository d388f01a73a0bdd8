//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use super::store::Completion;
use crate::domain::{
    Contribution, Eligibility, ModelVersion, Participant, Round, RoundId, RoundStatus, VersionNumber,
};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Participant {participant_id} already contributed to round {round_id}")]
    Duplicate { round_id: RoundId, participant_id: String },

    #[error("Round {round_id} is {status} and does not accept contributions")]
    RoundClosed { round_id: RoundId, status: RoundStatus },

    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition { from: RoundStatus, to: RoundStatus },

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<rusqlite::Error> for StateError {
    fn from(e: rusqlite::Error) -> Self {
        StateError::StoreError(e.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        StateError::DeserializationError(e.to_string())
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Fields written alongside a status transition
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub result_version: Option<VersionNumber>,
    pub failure_reason: Option<String>,
}

impl TransitionPatch {
    pub fn aggregated(version: VersionNumber) -> Self {
        Self {
            result_version: Some(version),
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            result_version: None,
            failure_reason: Some(reason.into()),
        }
    }
}

/// A model version before a number is assigned
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub parent: Option<VersionNumber>,
    pub payload_ref: String,
    pub content_hash: String,
    pub round_id: Option<RoundId>,
    pub contributors: Vec<String>,
    pub created_at: i64,
}

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Round operations
    CreateRound {
        round: Round,
        reply: oneshot::Sender<StateResponse<RoundId>>,
    },
    GetRound {
        id: RoundId,
        reply: oneshot::Sender<StateResponse<Option<Round>>>,
    },
    ListRounds {
        status_filter: Option<RoundStatus>,
        reply: oneshot::Sender<StateResponse<Vec<Round>>>,
    },
    ListExpiredOpen {
        now_ms: i64,
        reply: oneshot::Sender<StateResponse<Vec<Round>>>,
    },
    Transition {
        id: RoundId,
        from: RoundStatus,
        to: RoundStatus,
        patch: TransitionPatch,
        now_ms: i64,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    MarkAnnounced {
        id: RoundId,
        now_ms: i64,
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // Contribution operations
    AppendContribution {
        contribution: Contribution,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListContributions {
        round_id: RoundId,
        reply: oneshot::Sender<StateResponse<Vec<Contribution>>>,
    },

    // Model version operations
    RecordGenesis {
        version: NewVersion,
        reply: oneshot::Sender<StateResponse<ModelVersion>>,
    },
    CompleteRound {
        id: RoundId,
        version: NewVersion,
        now_ms: i64,
        reply: oneshot::Sender<StateResponse<Completion>>,
    },
    GetVersion {
        version: VersionNumber,
        reply: oneshot::Sender<StateResponse<Option<ModelVersion>>>,
    },
    LatestVersion {
        reply: oneshot::Sender<StateResponse<Option<ModelVersion>>>,
    },
    ListVersions {
        reply: oneshot::Sender<StateResponse<Vec<ModelVersion>>>,
    },

    // Participant operations
    TouchParticipant {
        id: String,
        tier: Option<String>,
        now_ms: i64,
        reply: oneshot::Sender<StateResponse<Participant>>,
    },
    GetParticipant {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Participant>>>,
    },
    ListParticipants {
        reply: oneshot::Sender<StateResponse<Vec<Participant>>>,
    },
    SetEligibility {
        id: String,
        eligibility: Eligibility,
        now_ms: i64,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    MarkStale {
        cutoff_ms: i64,
        reply: oneshot::Sender<StateResponse<usize>>,
    },

    // Shutdown
    Shutdown,
}
