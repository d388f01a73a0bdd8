//! State management with actor pattern
//!
//! StateManager owns the SQLite RoundStore and processes messages via
//! channels, providing serialized access to persistent round state.

mod manager;
mod messages;
mod recovery;
mod store;

pub use manager::StateManager;
pub use messages::{NewVersion, StateCommand, StateError, StateResponse, TransitionPatch};
pub use recovery::{RecoveryPlan, RecoveryStats, scan_for_recovery};
pub use store::{Completion, DB_FILE, RoundStore};
