//! Messaging - topics, wire messages and the bus seam

mod bus;
mod messages;
pub mod topics;

pub use bus::{BusError, DEFAULT_CHANNEL_CAPACITY, LocalBus, MessageBus, Subscription};
pub use messages::{FederationMessage, ReceiptOutcome, RejectReason};
pub use topics::{
    BootstrapReport, CONTROL_ROUNDS, DEFAULT_TOPICS, TASKS_TRAINING, TELEMETRY_EDGE, TopicAdmin, TopicSpec,
    UPDATES_EXPERTS, bootstrap_topics, topic_specs,
};
