//! Crash recovery
//!
//! Detects rounds left mid-flight by a crash so the coordinator can finish
//! them: announcements that were written but never published, rounds stuck
//! in `Closing`, and open rounds whose deadline passed while nobody was
//! watching.

use tracing::{debug, info};

use crate::domain::{Round, RoundStatus};

use super::{StateManager, StateResponse};

/// Recovery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Rounds whose round-start announcement is still owed
    pub to_announce: usize,
    /// Rounds stuck in Closing
    pub to_finish: usize,
    /// Open rounds past their deadline
    pub past_deadline: usize,
}

impl RecoveryStats {
    pub fn is_empty(&self) -> bool {
        self.to_announce == 0 && self.to_finish == 0 && self.past_deadline == 0
    }
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "announce: {}, finish: {}, past deadline: {}",
            self.to_announce, self.to_finish, self.past_deadline
        )
    }
}

/// Rounds needing attention after a restart
#[derive(Debug, Default, Clone)]
pub struct RecoveryPlan {
    pub to_announce: Vec<Round>,
    pub to_finish: Vec<Round>,
    pub past_deadline: Vec<Round>,
}

impl RecoveryPlan {
    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats {
            to_announce: self.to_announce.len(),
            to_finish: self.to_finish.len(),
            past_deadline: self.past_deadline.len(),
        }
    }
}

/// Scan the store for incomplete rounds
pub async fn scan_for_recovery(state: &StateManager, now_ms: i64) -> StateResponse<RecoveryPlan> {
    let open = state.list_open_rounds().await?;

    let to_announce: Vec<Round> = open.iter().filter(|r| r.needs_announcement()).cloned().collect();
    for round in &to_announce {
        debug!(round_id = round.id, base_version = round.base_version, "Found unannounced round");
    }

    let past_deadline: Vec<Round> = open.into_iter().filter(|r| r.deadline_passed(now_ms)).collect();
    let to_finish = state.list_rounds(Some(RoundStatus::Closing)).await?;
    for round in &to_finish {
        debug!(round_id = round.id, "Found round stuck in closing");
    }

    let plan = RecoveryPlan {
        to_announce,
        to_finish,
        past_deadline,
    };

    let stats = plan.stats();
    if stats.is_empty() {
        debug!("Recovery scan found no incomplete rounds");
    } else {
        info!("Recovery scan found incomplete rounds: {}", stats);
    }

    Ok(plan)
}
