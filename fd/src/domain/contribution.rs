//! Contribution domain type

use serde::{Deserialize, Serialize};

use super::RoundId;

/// An accepted participant update for a round
///
/// At most one contribution exists per (round, participant). The payload
/// itself lives in the model store; this record only references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub round_id: RoundId,
    pub participant_id: String,
    /// Model store reference of the uploaded delta
    pub payload_ref: String,
    /// Content hash supplied by the participant (`sha256:<hex>`)
    pub content_hash: String,
    /// Relative weight in the aggregate (e.g. local sample count)
    pub weight: f64,
    /// Receipt timestamp (Unix milliseconds)
    pub received_at: i64,
}

impl Contribution {
    pub fn new(
        round_id: RoundId,
        participant_id: impl Into<String>,
        payload_ref: impl Into<String>,
        content_hash: impl Into<String>,
        weight: f64,
        received_at: i64,
    ) -> Self {
        Self {
            round_id,
            participant_id: participant_id.into(),
            payload_ref: payload_ref.into(),
            content_hash: content_hash.into(),
            weight,
            received_at,
        }
    }
}
