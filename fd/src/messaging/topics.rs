//! Topic registry and provisioning
//!
//! Declares the logical channels of the federation and creates them through a
//! [`TopicAdmin`]. Provisioning runs once at deployment time
//! (`fednestd messaging bootstrap-topics`), never on the hot path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::bus::BusError;
use crate::config::MessagingConfig;

/// Round lifecycle announcements and contribution receipts
pub const CONTROL_ROUNDS: &str = "control.federation_rounds";
/// Participant updates (contribution submissions)
pub const UPDATES_EXPERTS: &str = "updates.experts.local";
/// Edge heartbeats
pub const TELEMETRY_EDGE: &str = "telemetry.edge";
/// Training work dispatch (provisioned, reserved)
pub const TASKS_TRAINING: &str = "tasks.training";

/// Every topic the federation expects to exist
pub const DEFAULT_TOPICS: [&str; 4] = [CONTROL_ROUNDS, UPDATES_EXPERTS, TELEMETRY_EDGE, TASKS_TRAINING];

/// Provisioning settings for one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub num_partitions: u32,
    pub replication_factor: u16,
    pub retention_ms: i64,
}

impl TopicSpec {
    /// A topic with single-node defaults
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            num_partitions: 1,
            replication_factor: 1,
            retention_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// Broker administration seam
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<String>, BusError>;
    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BusError>;
}

/// Resolve the topic specs from configuration, applying per-topic overrides
pub fn topic_specs(config: &MessagingConfig) -> Vec<TopicSpec> {
    DEFAULT_TOPICS
        .iter()
        .map(|name| {
            let over = config.topic_overrides.get(*name);
            TopicSpec {
                name: name.to_string(),
                num_partitions: over
                    .and_then(|o| o.num_partitions)
                    .unwrap_or(config.num_partitions),
                replication_factor: over
                    .and_then(|o| o.replication_factor)
                    .unwrap_or(config.replication_factor),
                retention_ms: over.and_then(|o| o.retention_ms).unwrap_or(config.retention_ms),
            }
        })
        .collect()
}

/// Outcome of a bootstrap run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
}

/// Create every missing federation topic
///
/// Existing topics are left untouched, so running this twice is harmless.
pub async fn bootstrap_topics(admin: &dyn TopicAdmin, config: &MessagingConfig) -> Result<BootstrapReport, BusError> {
    debug!(bootstrap_servers = %config.bootstrap_servers, "bootstrap_topics: called");
    let existing = admin.list_topics().await?;
    let mut report = BootstrapReport::default();

    for spec in topic_specs(config) {
        if existing.contains(&spec.name) {
            debug!(topic = %spec.name, "bootstrap_topics: already exists");
            report.existing.push(spec.name);
            continue;
        }
        admin.create_topic(&spec).await?;
        info!(
            topic = %spec.name,
            partitions = spec.num_partitions,
            replication = spec.replication_factor,
            "Created topic"
        );
        report.created.push(spec.name);
    }

    Ok(report)
}
