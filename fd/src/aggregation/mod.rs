//! Aggregation - folding accepted deltas into a new global model
//!
//! An [`Aggregator`] must be a pure function of the base payload and the
//! accepted updates: the same set in any arrival order produces the same
//! bytes, and re-running it after a crash reproduces the recorded result.

mod mean;

use thiserror::Error;

pub use mean::{MeanDelta, decode_f32, encode_f32};

/// Errors from validating or aggregating payloads
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AggregationError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Payload length {actual} does not match base length {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Invalid weight {weight} from {participant_id}")]
    InvalidWeight { participant_id: String, weight: f64 },

    #[error("Nothing to aggregate")]
    Empty,
}

/// One accepted update, as handed to the aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub participant_id: String,
    pub weight: f64,
    pub delta: Vec<u8>,
}

/// Pluggable aggregation algorithm
pub trait Aggregator: Send + Sync + std::fmt::Debug {
    /// Short name for logs and status output
    fn name(&self) -> &'static str;

    /// Check a single delta against the base before it is accepted
    fn validate(&self, base: &[u8], delta: &[u8]) -> Result<(), AggregationError>;

    /// Fold the updates into the base, producing the new snapshot
    fn aggregate(&self, base: &[u8], updates: &[Update]) -> Result<Vec<u8>, AggregationError>;
}
