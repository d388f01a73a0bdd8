//! Deterministic pseudo-training for simulations and tests

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{LocalTrainer, TrainerError, TrainingOutput};
use crate::aggregation::{decode_f32, encode_f32};
use crate::domain::{RoundId, Tier};

/// Produces small random deltas shaped like the base
///
/// The delta for a given (seed, round) pair is always the same, so runs are
/// reproducible.
#[derive(Debug, Clone)]
pub struct SyntheticTrainer {
    seed: u64,
    tier: Tier,
    scale: f32,
    weight: f64,
    delay: Duration,
}

impl SyntheticTrainer {
    pub fn new(seed: u64, tier: Tier) -> Self {
        Self {
            seed,
            tier,
            scale: 0.1,
            weight: 1.0,
            delay: Duration::ZERO,
        }
    }

    /// Seed derived from the participant id (FNV-1a)
    pub fn for_participant(participant_id: &str, tier: Tier) -> Self {
        let seed = participant_id
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3));
        Self::new(seed, tier)
    }

    /// Magnitude bound of each generated component
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Simulated training time
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl LocalTrainer for SyntheticTrainer {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn train(&self, round_id: RoundId, base: &[u8]) -> Result<TrainingOutput, TrainerError> {
        debug!(round_id, seed = self.seed, "SyntheticTrainer::train: called");
        let len = decode_f32(base)
            .map_err(|e| TrainerError::InvalidOutput(e.to_string()))?
            .len();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut rng = StdRng::seed_from_u64(self.seed ^ round_id.rotate_left(32));
        let values: Vec<f32> = if self.scale > 0.0 {
            (0..len).map(|_| rng.random_range(-self.scale..self.scale)).collect()
        } else {
            vec![0.0; len]
        };

        Ok(TrainingOutput {
            delta: encode_f32(&values),
            weight: self.weight,
        })
    }
}
