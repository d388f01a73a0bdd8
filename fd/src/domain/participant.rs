//! Participant domain type

use serde::{Deserialize, Serialize};

/// Deployment tier of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Data-center core (runs the coordinator)
    Tier1,
    /// Edge server
    #[default]
    Tier2,
    /// Constrained edge device
    Tier3,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
        }
    }

    /// Tiers that run edge client sessions
    pub fn is_edge(&self) -> bool {
        matches!(self, Self::Tier2 | Self::Tier3)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Participant eligibility for new rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    #[default]
    Active,
    /// No contact within the liveness window
    Stale,
    /// Operator-suspended; contact does not lift it
    Suspended,
}

impl Eligibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Suspended => "suspended",
        }
    }
}

impl std::fmt::Display for Eligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Eligibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "stale" => Ok(Self::Stale),
            "suspended" => Ok(Self::Suspended),
            other => Err(format!("unknown eligibility: {}", other)),
        }
    }
}

/// An edge node known to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    /// Last contribution or heartbeat (Unix milliseconds)
    pub last_seen: i64,
    pub eligibility: Eligibility,
    /// Tier reported in heartbeats, if any
    pub tier: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: id.into(),
            last_seen: now_ms,
            eligibility: Eligibility::Active,
            tier: None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.eligibility == Eligibility::Suspended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligibility_parse() {
        for e in [Eligibility::Active, Eligibility::Stale, Eligibility::Suspended] {
            assert_eq!(e.as_str().parse::<Eligibility>().unwrap(), e);
        }
        assert!("banned".parse::<Eligibility>().is_err());
    }

    #[test]
    fn test_tier_names() {
        assert_eq!(Tier::Tier3.to_string(), "tier3");
        assert!(Tier::Tier2.is_edge());
        assert!(!Tier::Tier1.is_edge());
        let parsed: Tier = serde_yaml::from_str("tier2").unwrap();
        assert_eq!(parsed, Tier::Tier2);
    }

    #[test]
    fn test_new_participant_is_active() {
        let p = Participant::new("edge-001", 42);
        assert_eq!(p.eligibility, Eligibility::Active);
        assert!(!p.is_suspended());
        assert_eq!(p.last_seen, 42);
    }
}
