//! Edge session state machine

use serde::{Deserialize, Serialize};

/// Where an edge session is in its round cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not listening for rounds
    #[default]
    Idle,
    /// Subscribed, waiting for a round naming this participant
    AwaitingRound,
    /// Local trainer running against the round's base
    Training,
    /// Uploading the delta and submitting it
    Submitting,
    /// Last round failed; cooling down before returning to Idle
    Error,
}

impl SessionState {
    /// Check whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, AwaitingRound)
                | (AwaitingRound, Training)
                | (AwaitingRound, Idle)
                | (Training, Submitting)
                | (Submitting, Idle)
                | (AwaitingRound, Error)
                | (Training, Error)
                | (Submitting, Error)
                | (Error, Idle)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingRound => "awaiting_round",
            Self::Training => "training",
            Self::Submitting => "submitting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [
            SessionState::Idle,
            SessionState::AwaitingRound,
            SessionState::Training,
            SessionState::Submitting,
            SessionState::Idle,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_error_reachable_from_active_states_only() {
        assert!(!SessionState::Idle.can_transition_to(SessionState::Error));
        assert!(SessionState::Training.can_transition_to(SessionState::Error));
        assert!(SessionState::Error.can_transition_to(SessionState::Idle));
        assert!(!SessionState::Error.can_transition_to(SessionState::Training));
    }

    #[test]
    fn test_no_skipping_training() {
        assert!(!SessionState::AwaitingRound.can_transition_to(SessionState::Submitting));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Training));
    }
}
