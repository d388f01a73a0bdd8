//! Domain types for the federation control plane

mod contribution;
mod participant;
mod round;
mod time;
mod version;

pub use contribution::Contribution;
pub use participant::{Eligibility, Participant, Tier};
pub use round::{AggregationPolicy, CloseDecision, Round, RoundId, RoundStatus};
pub use time::{Clock, ManualClock, SystemClock, now_ms};
pub use version::{ModelVersion, VersionNumber};
