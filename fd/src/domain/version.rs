//! Model version domain type

use serde::{Deserialize, Serialize};

use super::RoundId;

/// Model version number, monotonically increasing from 1 (genesis)
pub type VersionNumber = u64;

/// An immutable global model snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: VersionNumber,
    /// Version this one was aggregated from (`None` only for genesis)
    pub parent: Option<VersionNumber>,
    /// Model store reference of the snapshot bytes
    pub payload_ref: String,
    pub content_hash: String,
    /// Round that produced this version (`None` for genesis)
    pub round_id: Option<RoundId>,
    /// Participants whose contributions were folded in, sorted
    pub contributors: Vec<String>,
    pub created_at: i64,
}

impl ModelVersion {
    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }
}
