//! Local training seam
//!
//! An edge session never computes updates itself; it hands the base snapshot
//! to a [`LocalTrainer`] and submits whatever delta comes back.

mod command;
mod synthetic;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{RoundId, Tier};
use crate::session::EdgeConfig;

pub use command::CommandTrainer;
pub use synthetic::SyntheticTrainer;

/// Errors from a training run
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("Failed to launch trainer: {0}")]
    Spawn(String),

    #[error("Trainer exited with code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    #[error("Trainer timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid trainer output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What one training run produced
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutput {
    /// Update relative to the base snapshot
    pub delta: Vec<u8>,
    /// Relative weight of this update (e.g. local sample count)
    pub weight: f64,
}

/// Computes a local update against a base model snapshot
#[async_trait]
pub trait LocalTrainer: Send + Sync {
    /// Tier this trainer is built for
    fn tier(&self) -> Tier;

    /// Train against `base` for `round_id`
    async fn train(&self, round_id: RoundId, base: &[u8]) -> Result<TrainingOutput, TrainerError>;
}

/// Pick the trainer an edge config asks for
pub fn trainer_for(config: &EdgeConfig) -> Arc<dyn LocalTrainer> {
    match &config.trainer_command {
        Some(command) => Arc::new(CommandTrainer::new(command, config.tier)),
        None => Arc::new(SyntheticTrainer::for_participant(&config.participant_id, config.tier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trainer_for_config() {
        let mut config = EdgeConfig::for_participant("edge-007");
        config.tier = Tier::Tier3;
        assert_eq!(trainer_for(&config).tier(), Tier::Tier3);

        config.trainer_command = Some("true".into());
        assert_eq!(trainer_for(&config).tier(), Tier::Tier3);
    }
}
