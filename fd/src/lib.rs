//! fednest - Federated Aggregation Control Plane
//!
//! Coordinates untrusted, intermittently connected edge clients through
//! discrete training rounds: a Tier 1 coordinator announces a round against a
//! base model version, Tier 2/3 edge sessions train locally and submit
//! deltas, and the coordinator aggregates the accepted set into the next
//! model version.
//!
//! # Core Concepts
//!
//! - **Durable first**: every round status change is a compare-and-swap in the round store
//! - **Content addressed**: payloads live in the model store under `sha256:` references
//! - **Deterministic aggregation**: the same accepted set yields the same bytes
//! - **Local failures**: a bad contribution fails itself, a bad round fails only that round
//!
//! # Modules
//!
//! - [`coordinator`] - Round lifecycle, sweep and operator alerts
//! - [`session`] - Edge client state machine
//! - [`training`] - Local trainer seam
//! - [`state`] - SQLite round store behind an actor
//! - [`messaging`] - Topics, wire messages and the bus seam
//! - [`aggregation`] - Pluggable aggregators
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod aggregation;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod messaging;
pub mod session;
pub mod state;
pub mod training;

// Re-export commonly used types
pub use aggregation::{AggregationError, Aggregator, MeanDelta, Update};
pub use config::{Config, MessagingConfig, RoundConfig, StorageConfig};
pub use coordinator::{AlertKind, CoordError, Coordinator, CoordinatorConfig, OperatorAlert, Submission, SweepReport};
pub use domain::{
    AggregationPolicy, Clock, Contribution, Eligibility, ManualClock, ModelVersion, Participant, Round, RoundId,
    RoundStatus, SystemClock, Tier, VersionNumber,
};
pub use messaging::{BusError, FederationMessage, LocalBus, MessageBus, RejectReason, TopicAdmin};
pub use session::{BusLink, CoordinatorLink, DirectLink, EdgeConfig, EdgeSession, SessionError, SessionState};
pub use state::{RecoveryStats, StateError, StateManager, scan_for_recovery};
pub use training::{CommandTrainer, LocalTrainer, SyntheticTrainer, TrainerError, TrainingOutput};
