//! Round domain type
//!
//! A round is one aggregation cycle: the coordinator announces it, edge
//! participants contribute deltas against the base version, and the round is
//! closed into a new model version (or fails/expires).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::VersionNumber;

/// Round identifier, assigned monotonically by the state store
pub type RoundId = u64;

/// Round lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Written to the store, announcement sent or owed
    #[default]
    Announced,
    /// At least one contribution accepted
    Collecting,
    /// Closing criteria met, aggregation in progress
    Closing,
    /// New model version recorded
    Aggregated,
    /// Publish exhausted, operator cancel or aggregation error
    Failed,
    /// Deadline passed with no contributions
    Expired,
}

impl RoundStatus {
    /// Terminal statuses are never left again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aggregated | Self::Failed | Self::Expired)
    }

    /// Rounds that still accept contributions
    pub fn accepts_contributions(&self) -> bool {
        matches!(self, Self::Announced | Self::Collecting)
    }

    /// Check whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: RoundStatus) -> bool {
        use RoundStatus::*;
        matches!(
            (self, next),
            (Announced, Collecting)
                | (Announced, Closing)
                | (Collecting, Closing)
                | (Closing, Aggregated)
                | (Announced, Expired)
                | (Collecting, Expired)
                | (Announced, Failed)
                | (Collecting, Failed)
                | (Closing, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Announced => "announced",
            Self::Collecting => "collecting",
            Self::Closing => "closing",
            Self::Aggregated => "aggregated",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// All statuses, in lifecycle order
    pub const ALL: [RoundStatus; 6] = [
        Self::Announced,
        Self::Collecting,
        Self::Closing,
        Self::Aggregated,
        Self::Failed,
        Self::Expired,
    ];
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RoundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown round status: {}", s))
    }
}

/// Policy controlling when a round closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationPolicy {
    /// Contributions needed to close early
    pub min_contributors: u32,
    /// Seconds from creation until the deadline
    pub timeout_secs: u64,
    /// Wait for every expected participant (or the deadline) before closing
    pub all_or_nothing: bool,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            min_contributors: 2,
            timeout_secs: 60,
            all_or_nothing: false,
        }
    }
}

impl AggregationPolicy {
    /// Validate the policy against the size of the expected participant set
    pub fn validate(&self, participant_count: usize) -> Result<(), String> {
        if participant_count == 0 {
            return Err("participant set is empty".to_string());
        }
        if self.min_contributors == 0 {
            return Err("min_contributors must be at least 1".to_string());
        }
        if self.min_contributors as usize > participant_count {
            return Err(format!(
                "min_contributors ({}) exceeds participant set size ({})",
                self.min_contributors, participant_count
            ));
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be positive".to_string());
        }
        Ok(())
    }
}

/// Outcome of checking a round's closing criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Keep collecting
    Wait,
    /// Close and aggregate; `partial` when closed by deadline below threshold
    Close { partial: bool },
    /// Deadline passed with nothing to aggregate
    Expire,
}

/// A single aggregation round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub status: RoundStatus,
    /// Model version every contribution must be computed against
    pub base_version: VersionNumber,
    /// Participants invited to the round
    pub expected: BTreeSet<String>,
    /// Participants with an accepted contribution (derived from contributions)
    #[serde(default)]
    pub contributed: BTreeSet<String>,
    pub policy: AggregationPolicy,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
    /// Deadline timestamp (Unix milliseconds)
    pub deadline: i64,
    /// Set once the round-start announcement has been published
    pub announced_at: Option<i64>,
    /// Version produced by this round
    pub result_version: Option<VersionNumber>,
    pub failure_reason: Option<String>,
    pub updated_at: i64,
}

impl Round {
    /// Build a new, not yet stored round (id is assigned by the store)
    pub fn new(
        base_version: VersionNumber,
        expected: impl IntoIterator<Item = String>,
        policy: AggregationPolicy,
        now_ms: i64,
    ) -> Self {
        let timeout_ms = i64::try_from(policy.timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self {
            id: 0,
            status: RoundStatus::Announced,
            base_version,
            expected: expected.into_iter().collect(),
            contributed: BTreeSet::new(),
            policy,
            created_at: now_ms,
            deadline: now_ms.saturating_add(timeout_ms),
            announced_at: None,
            result_version: None,
            failure_reason: None,
            updated_at: now_ms,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn deadline_passed(&self, now_ms: i64) -> bool {
        now_ms >= self.deadline
    }

    pub fn contribution_count(&self) -> usize {
        self.contributed.len()
    }

    pub fn is_expected(&self, participant_id: &str) -> bool {
        self.expected.contains(participant_id)
    }

    pub fn all_contributed(&self) -> bool {
        self.expected.iter().all(|p| self.contributed.contains(p))
    }

    /// Whether the round-start announcement is still owed
    pub fn needs_announcement(&self) -> bool {
        self.announced_at.is_none() && self.status.accepts_contributions()
    }

    /// Apply the closing criteria at time `now_ms`
    ///
    /// Closes when the threshold is met (unless all-or-nothing), when every
    /// expected participant contributed, or when the deadline passed with at
    /// least one contribution. A deadline with no contributions expires.
    pub fn closing_decision(&self, now_ms: i64) -> CloseDecision {
        let count = self.contribution_count();
        let threshold_met = count >= self.policy.min_contributors as usize;

        if threshold_met && !self.policy.all_or_nothing {
            return CloseDecision::Close { partial: false };
        }
        if self.all_contributed() {
            return CloseDecision::Close { partial: false };
        }
        if self.deadline_passed(now_ms) {
            if count >= 1 {
                return CloseDecision::Close { partial: !threshold_met };
            }
            return CloseDecision::Expire;
        }
        CloseDecision::Wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(policy: AggregationPolicy) -> Round {
        Round::new(
            1,
            ["edge-a", "edge-b", "edge-c"].map(String::from),
            policy,
            10_000,
        )
    }

    #[test]
    fn test_status_transitions() {
        use RoundStatus::*;
        assert!(Announced.can_transition_to(Collecting));
        assert!(Collecting.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Aggregated));
        assert!(Closing.can_transition_to(Failed));
        assert!(Collecting.can_transition_to(Expired));

        assert!(!Closing.can_transition_to(Expired));
        assert!(!Collecting.can_transition_to(Announced));
        for terminal in [Aggregated, Failed, Expired] {
            for next in RoundStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in RoundStatus::ALL {
            assert_eq!(status.as_str().parse::<RoundStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<RoundStatus>().is_err());
    }

    #[test]
    fn test_policy_validation() {
        let policy = AggregationPolicy::default();
        assert!(policy.validate(3).is_ok());
        assert!(policy.validate(0).is_err());
        assert!(policy.validate(1).is_err());

        let zero_min = AggregationPolicy {
            min_contributors: 0,
            ..policy
        };
        assert!(zero_min.validate(3).is_err());

        let zero_timeout = AggregationPolicy {
            timeout_secs: 0,
            ..policy
        };
        assert!(zero_timeout.validate(3).is_err());
    }

    #[test]
    fn test_new_round_deadline() {
        let r = round(AggregationPolicy::default());
        assert_eq!(r.deadline, 70_000);
        assert_eq!(r.status, RoundStatus::Announced);
        assert!(r.needs_announcement());
    }

    #[test]
    fn test_closing_decision_threshold() {
        let mut r = round(AggregationPolicy::default());
        assert_eq!(r.closing_decision(10_000), CloseDecision::Wait);

        r.contributed.insert("edge-a".into());
        assert_eq!(r.closing_decision(10_000), CloseDecision::Wait);

        r.contributed.insert("edge-b".into());
        assert_eq!(r.closing_decision(10_000), CloseDecision::Close { partial: false });
    }

    #[test]
    fn test_closing_decision_all_or_nothing_waits_for_everyone() {
        let mut r = round(AggregationPolicy {
            all_or_nothing: true,
            ..Default::default()
        });
        r.contributed.insert("edge-a".into());
        r.contributed.insert("edge-b".into());
        assert_eq!(r.closing_decision(10_000), CloseDecision::Wait);

        r.contributed.insert("edge-c".into());
        assert_eq!(r.closing_decision(10_000), CloseDecision::Close { partial: false });
    }

    #[test]
    fn test_closing_decision_deadline() {
        let mut r = round(AggregationPolicy::default());
        assert_eq!(r.closing_decision(70_000), CloseDecision::Expire);

        r.contributed.insert("edge-a".into());
        assert_eq!(r.closing_decision(70_000), CloseDecision::Close { partial: true });
    }
}
