//! Edge client sessions
//!
//! Per-node state machine that turns round announcements into submitted
//! contributions.

mod config;
mod core;
mod link;
mod state;

pub use config::EdgeConfig;
pub use core::{EdgeSession, RoundAssignment, SessionError, SubmitOutcome};
pub use link::{BusLink, CoordinatorLink, DirectLink, SubmitError};
pub use state::SessionState;
