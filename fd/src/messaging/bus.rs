//! Message bus - publish/subscribe over named topics
//!
//! [`MessageBus`] is the seam the coordinator and edge sessions talk through.
//! [`LocalBus`] is the in-process implementation: one tokio broadcast channel
//! per provisioned topic, with messages JSON-encoded on the way through so the
//! same codec path is exercised as with an external broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::messages::FederationMessage;
use super::topics::{TopicAdmin, TopicSpec};

/// Default per-topic channel capacity (messages)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Errors from bus operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Publish timed out on {0}")]
    Timeout(String),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Bus closed")]
    Closed,
}

impl BusError {
    /// Transient failures worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Timeout(_) | BusError::Unavailable(_))
    }
}

/// Publish/subscribe transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message to a topic
    async fn publish(&self, topic: &str, message: &FederationMessage) -> Result<(), BusError>;

    /// Subscribe to a topic; only messages published afterwards are delivered
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;
}

/// A live subscription to one topic
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<Arc<str>>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next decodable message; `None` once the topic is closed
    pub async fn recv(&mut self) -> Option<FederationMessage> {
        loop {
            match self.rx.recv().await {
                Ok(raw) => match serde_json::from_str::<FederationMessage>(&raw) {
                    Ok(message) => return Some(message),
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "Subscription::recv: dropping undecodable message");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscription::recv: lagged, messages skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Default)]
struct LocalBusInner {
    topics: HashMap<String, broadcast::Sender<Arc<str>>>,
    specs: HashMap<String, TopicSpec>,
    injected_failures: HashMap<String, (usize, BusError)>,
}

/// In-process bus on tokio broadcast channels
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Mutex<LocalBusInner>>,
    capacity: usize,
}

impl LocalBus {
    /// Create a bus with no topics provisioned
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "LocalBus::new: called");
        Self {
            inner: Arc::new(Mutex::new(LocalBusInner::default())),
            capacity,
        }
    }

    /// Create a bus with every default federation topic provisioned
    pub fn with_default_topics() -> Self {
        let bus = Self::new(DEFAULT_CHANNEL_CAPACITY);
        for name in super::topics::DEFAULT_TOPICS {
            bus.ensure_topic(TopicSpec::named(name));
        }
        bus
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LocalBusInner>, BusError> {
        self.inner.lock().map_err(|_| BusError::Closed)
    }

    fn ensure_topic(&self, spec: TopicSpec) {
        if let Ok(mut inner) = self.lock() {
            let capacity = self.capacity;
            inner
                .topics
                .entry(spec.name.clone())
                .or_insert_with(|| broadcast::channel(capacity).0);
            inner.specs.insert(spec.name.clone(), spec);
        }
    }

    /// Make the next `count` publishes to `topic` fail with `error`
    ///
    /// Used by simulations and tests to exercise broker outages.
    pub fn fail_publishes(&self, topic: &str, count: usize, error: BusError) {
        debug!(%topic, count, %error, "LocalBus::fail_publishes: called");
        if let Ok(mut inner) = self.lock() {
            inner.injected_failures.insert(topic.to_string(), (count, error));
        }
    }

    /// Provisioned settings for a topic
    pub fn topic_spec(&self, topic: &str) -> Option<TopicSpec> {
        self.lock().ok().and_then(|inner| inner.specs.get(topic).cloned())
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|inner| inner.topics.get(topic).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::with_default_topics()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, topic: &str, message: &FederationMessage) -> Result<(), BusError> {
        debug!(%topic, kind = message.kind(), round_id = ?message.round_id(), "LocalBus::publish: called");
        let raw: Arc<str> = serde_json::to_string(message)
            .map_err(|e| BusError::Codec(e.to_string()))?
            .into();

        let tx = {
            let mut inner = self.lock()?;
            if let Some((remaining, error)) = inner.injected_failures.get_mut(topic)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(error.clone());
            }
            inner
                .topics
                .get(topic)
                .cloned()
                .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?
        };

        // No subscribers is fine: the message is simply not retained
        let _ = tx.send(raw);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        debug!(%topic, "LocalBus::subscribe: called");
        let inner = self.lock()?;
        let tx = inner
            .topics
            .get(topic)
            .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?;
        Ok(Subscription {
            topic: topic.to_string(),
            rx: tx.subscribe(),
        })
    }
}

#[async_trait]
impl TopicAdmin for LocalBus {
    async fn list_topics(&self) -> Result<Vec<String>, BusError> {
        let mut names: Vec<String> = self.lock()?.topics.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BusError> {
        debug!(topic = %spec.name, partitions = spec.num_partitions, "LocalBus::create_topic: called");
        self.ensure_topic(spec.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::topics::{CONTROL_ROUNDS, TELEMETRY_EDGE};

    fn heartbeat(id: &str) -> FederationMessage {
        FederationMessage::Heartbeat {
            participant_id: id.into(),
            tier: "tier2".into(),
            sent_at: 1,
            local_version: Some(1),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = LocalBus::with_default_topics();
        let mut sub = bus.subscribe(TELEMETRY_EDGE).await.unwrap();

        bus.publish(TELEMETRY_EDGE, &heartbeat("edge-1")).await.unwrap();
        assert_eq!(sub.recv().await.unwrap(), heartbeat("edge-1"));
        assert_eq!(sub.topic(), TELEMETRY_EDGE);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = LocalBus::with_default_topics();
        let mut control = bus.subscribe(CONTROL_ROUNDS).await.unwrap();

        bus.publish(TELEMETRY_EDGE, &heartbeat("edge-1")).await.unwrap();
        bus.publish(CONTROL_ROUNDS, &heartbeat("edge-2")).await.unwrap();
        assert_eq!(control.recv().await.unwrap(), heartbeat("edge-2"));
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let bus = LocalBus::new(16);
        let err = bus.publish("nope", &heartbeat("x")).await.unwrap_err();
        assert_eq!(err, BusError::UnknownTopic("nope".into()));
        assert!(!err.is_retryable());
        assert!(bus.subscribe("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let bus = LocalBus::with_default_topics();
        bus.fail_publishes(TELEMETRY_EDGE, 2, BusError::Unavailable("down".into()));

        for _ in 0..2 {
            let err = bus.publish(TELEMETRY_EDGE, &heartbeat("e")).await.unwrap_err();
            assert!(err.is_retryable());
        }
        bus.publish(TELEMETRY_EDGE, &heartbeat("e")).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let bus = LocalBus::with_default_topics();
        assert_eq!(bus.subscriber_count(CONTROL_ROUNDS), 0);
        let _sub = bus.subscribe(CONTROL_ROUNDS).await.unwrap();
        assert_eq!(bus.subscriber_count(CONTROL_ROUNDS), 1);
    }
}
