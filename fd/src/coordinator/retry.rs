//! Bounded publish retry with exponential backoff

use tokio::time::sleep;
use tracing::{debug, warn};

use super::config::CoordinatorConfig;
use crate::messaging::{BusError, FederationMessage, MessageBus};

/// Publish `message`, retrying transient failures up to `publish_max_retries` times
///
/// Returns the number of attempts used. Non-retryable errors fail immediately.
pub async fn publish_with_retry(
    bus: &dyn MessageBus,
    topic: &str,
    message: &FederationMessage,
    config: &CoordinatorConfig,
) -> Result<u32, BusError> {
    debug!(%topic, kind = message.kind(), "publish_with_retry: called");
    let mut last_error = None;

    for attempt in 0..=config.publish_max_retries {
        if attempt > 0 {
            let backoff = config.publish_backoff(attempt);
            warn!(
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                %topic,
                "publish_with_retry: retrying after transient error"
            );
            sleep(backoff).await;
        }

        match bus.publish(topic, message).await {
            Ok(()) => return Ok(attempt + 1),
            Err(e) if e.is_retryable() => {
                debug!(attempt, error = %e, "publish_with_retry: transient failure");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or(BusError::Closed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{LocalBus, TELEMETRY_EDGE};

    fn message() -> FederationMessage {
        FederationMessage::Heartbeat {
            participant_id: "edge-1".into(),
            tier: "tier2".into(),
            sent_at: 0,
            local_version: None,
        }
    }

    fn fast_config(retries: u32) -> CoordinatorConfig {
        CoordinatorConfig {
            publish_max_retries: retries,
            publish_backoff_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let bus = LocalBus::with_default_topics();
        bus.fail_publishes(TELEMETRY_EDGE, 2, BusError::Timeout("slow".into()));

        let attempts = publish_with_retry(&bus, TELEMETRY_EDGE, &message(), &fast_config(3))
            .await
            .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let bus = LocalBus::with_default_topics();
        bus.fail_publishes(TELEMETRY_EDGE, 10, BusError::Unavailable("down".into()));

        let err = publish_with_retry(&bus, TELEMETRY_EDGE, &message(), &fast_config(2))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::Unavailable("down".into()));
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let bus = LocalBus::new(8);
        let err = publish_with_retry(&bus, "missing.topic", &message(), &fast_config(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownTopic(_)));
    }
}
