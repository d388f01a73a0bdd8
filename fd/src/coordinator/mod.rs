//! Aggregation coordinator
//!
//! Drives rounds through their lifecycle:
//! - **Announce:** persist the round, then publish round-start
//! - **Collect:** verify and record contributions
//! - **Close:** aggregate into a new model version, or expire

mod alerts;
mod config;
mod core;
mod error;
mod retry;

pub use alerts::{AlertKind, OperatorAlert};
pub use config::CoordinatorConfig;
pub use core::{Coordinator, Submission, SweepReport};
pub use error::CoordError;
pub use retry::publish_with_retry;
