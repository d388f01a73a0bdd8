//! How an edge session reaches the coordinator
//!
//! [`DirectLink`] calls an in-process coordinator; [`BusLink`] publishes the
//! submission on the updates topic and waits for the matching receipt on the
//! control topic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::coordinator::{Coordinator, Submission};
use crate::domain::RoundStatus;
use crate::messaging::{CONTROL_ROUNDS, FederationMessage, MessageBus, ReceiptOutcome, RejectReason, UPDATES_EXPERTS};

const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from submitting a contribution
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SubmitError {
    #[error("Rejected ({reason}): {message}")]
    Rejected { reason: RejectReason, message: String },

    #[error("No receipt within {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SubmitError {
    /// Failures worth another attempt with the same payload
    pub fn is_transient(&self) -> bool {
        match self {
            SubmitError::Rejected { reason, .. } => reason.is_transient(),
            SubmitError::Timeout(_) | SubmitError::Transport(_) => true,
        }
    }
}

/// Submission channel to the coordinator
#[async_trait]
pub trait CoordinatorLink: Send + Sync {
    /// Submit a contribution; `Ok` carries the round status after acceptance
    async fn submit(&self, submission: &Submission) -> Result<RoundStatus, SubmitError>;
}

/// Calls a coordinator in the same process
#[derive(Debug, Clone)]
pub struct DirectLink {
    coordinator: Coordinator,
}

impl DirectLink {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl CoordinatorLink for DirectLink {
    async fn submit(&self, submission: &Submission) -> Result<RoundStatus, SubmitError> {
        self.coordinator
            .submit_contribution(submission.clone())
            .await
            .map_err(|e| SubmitError::Rejected {
                reason: e.reject_reason(),
                message: e.to_string(),
            })
    }
}

/// Request/receipt over the message bus
#[derive(Clone)]
pub struct BusLink {
    bus: Arc<dyn MessageBus>,
    receipt_timeout: Duration,
}

impl BusLink {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        }
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }
}

#[async_trait]
impl CoordinatorLink for BusLink {
    async fn submit(&self, submission: &Submission) -> Result<RoundStatus, SubmitError> {
        let request_id = uuid::Uuid::now_v7().to_string();
        debug!(%request_id, round_id = submission.round_id, "BusLink::submit: called");

        // Subscribe before publishing so the receipt cannot slip past
        let mut receipts = self
            .bus
            .subscribe(CONTROL_ROUNDS)
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        self.bus
            .publish(
                UPDATES_EXPERTS,
                &FederationMessage::ContributionSubmitted {
                    request_id: request_id.clone(),
                    round_id: submission.round_id,
                    participant_id: submission.participant_id.clone(),
                    payload_ref: submission.payload_ref.clone(),
                    content_hash: submission.content_hash.clone(),
                    weight: submission.weight,
                },
            )
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        let wait = async {
            while let Some(message) = receipts.recv().await {
                if let FederationMessage::ContributionReceipt {
                    request_id: id, outcome, ..
                } = message
                    && id == request_id
                {
                    return Some(outcome);
                }
            }
            None
        };

        match tokio::time::timeout(self.receipt_timeout, wait).await {
            Err(_) => Err(SubmitError::Timeout(self.receipt_timeout)),
            Ok(None) => Err(SubmitError::Transport("control topic closed".to_string())),
            Ok(Some(ReceiptOutcome::Accepted { round_status })) => Ok(round_status),
            Ok(Some(ReceiptOutcome::Rejected { reason, message })) => Err(SubmitError::Rejected { reason, message }),
        }
    }
}
