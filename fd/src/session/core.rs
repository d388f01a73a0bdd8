//! Edge client session
//!
//! One session per edge node. It waits for a round naming this participant,
//! makes sure it holds the round's base model, trains, uploads the delta and
//! submits it. Rounds are handled one at a time on a single task, so a
//! session never takes part in two rounds at once.

use std::sync::Arc;

use modelstore::ModelStore;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::config::EdgeConfig;
use super::link::{CoordinatorLink, SubmitError};
use super::state::SessionState;
use crate::coordinator::Submission;
use crate::domain::{Clock, RoundId, RoundStatus, VersionNumber};
use crate::messaging::{BusError, CONTROL_ROUNDS, FederationMessage, MessageBus, RejectReason, TELEMETRY_EDGE};
use crate::training::{LocalTrainer, TrainerError};

/// Errors that end a session's participation in a round
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Illegal session transition {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },

    #[error("Base model {reference} unavailable: {message}")]
    BaseUnavailable { reference: String, message: String },

    #[error("Base model integrity mismatch: expected {expected}, got {actual}")]
    BaseIntegrity { expected: String, actual: String },

    #[error("Training failed: {0}")]
    Trainer(#[from] TrainerError),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Contribution rejected ({reason}): {message}")]
    Rejected { reason: RejectReason, message: String },

    #[error("Submission gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: SubmitError },

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// How a round ended from this session's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted; the round is now in this status
    Accepted(RoundStatus),
    /// The coordinator already held this participant's contribution
    AlreadyRecorded,
}

/// The base model this session currently trains against
#[derive(Debug, Clone)]
struct LocalModel {
    version: VersionNumber,
    payload_ref: String,
    bytes: Arc<Vec<u8>>,
}

/// A round announcement addressed to this participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundAssignment {
    pub round_id: RoundId,
    pub base_version: VersionNumber,
    pub base_ref: String,
    pub deadline: i64,
}

pub struct EdgeSession {
    config: EdgeConfig,
    bus: Arc<dyn MessageBus>,
    models: ModelStore,
    link: Arc<dyn CoordinatorLink>,
    trainer: Arc<dyn LocalTrainer>,
    clock: Arc<dyn Clock>,
    local: Option<LocalModel>,
    last_round: Option<RoundId>,
    state_tx: watch::Sender<SessionState>,
}

impl std::fmt::Debug for EdgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeSession")
            .field("participant_id", &self.config.participant_id)
            .field("state", &*self.state_tx.borrow())
            .field("local_version", &self.local_version())
            .field("last_round", &self.last_round)
            .finish_non_exhaustive()
    }
}

impl EdgeSession {
    pub fn new(
        config: EdgeConfig,
        bus: Arc<dyn MessageBus>,
        models: ModelStore,
        link: Arc<dyn CoordinatorLink>,
        trainer: Arc<dyn LocalTrainer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!(participant_id = %config.participant_id, tier = %trainer.tier(), "EdgeSession::new: called");
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            bus,
            models,
            link,
            trainer,
            clock,
            local: None,
            last_round: None,
            state_tx,
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.config.participant_id
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Observe state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Version of the base model currently held, if any
    pub fn local_version(&self) -> Option<VersionNumber> {
        self.local.as_ref().map(|m| m.version)
    }

    fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        let current = self.state();
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(SessionError::IllegalTransition {
                from: current,
                to: next,
            });
        }
        debug!(participant_id = %self.config.participant_id, from = %current, to = %next, "EdgeSession: transition");
        self.state_tx.send_replace(next);
        Ok(())
    }

    /// Start listening for rounds
    pub fn begin_waiting(&self) -> Result<(), SessionError> {
        self.transition(SessionState::AwaitingRound)
    }

    /// Decide whether an announcement is for this session
    ///
    /// Takes round-start messages naming this participant, with a deadline
    /// still ahead and a round newer than the last one handled.
    pub fn assignment(&self, message: &FederationMessage) -> Option<RoundAssignment> {
        let FederationMessage::RoundStarted {
            round_id,
            base_version,
            base_ref,
            participants,
            deadline,
            ..
        } = message
        else {
            return None;
        };

        if !participants.iter().any(|p| p == &self.config.participant_id) {
            return None;
        }
        if *deadline <= self.clock.now_ms() {
            debug!(round_id, "EdgeSession::assignment: deadline already passed");
            return None;
        }
        if self.last_round.is_some_and(|last| *round_id <= last) {
            debug!(round_id, "EdgeSession::assignment: round already handled");
            return None;
        }

        Some(RoundAssignment {
            round_id: *round_id,
            base_version: *base_version,
            base_ref: base_ref.clone(),
            deadline: *deadline,
        })
    }

    /// Take part in one round: sync the base, train, upload and submit
    ///
    /// On error the session is left in `Error`; [`EdgeSession::recover`]
    /// returns it to `Idle`.
    pub async fn participate(&mut self, assignment: &RoundAssignment) -> Result<SubmitOutcome, SessionError> {
        if self.state() == SessionState::Idle {
            self.begin_waiting()?;
        }
        self.last_round = Some(assignment.round_id);

        match self.run_round(assignment).await {
            Ok(outcome) => {
                self.transition(SessionState::Idle)?;
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    participant_id = %self.config.participant_id,
                    round_id = assignment.round_id,
                    error = %e,
                    "Round participation failed"
                );
                self.state_tx.send_replace(SessionState::Error);
                Err(e)
            }
        }
    }

    async fn run_round(&mut self, assignment: &RoundAssignment) -> Result<SubmitOutcome, SessionError> {
        self.transition(SessionState::Training)?;
        let base = self.ensure_base(assignment).await?;

        let output = self.trainer.train(assignment.round_id, &base).await?;
        debug!(round_id = assignment.round_id, size = output.delta.len(), weight = output.weight, "Training complete");

        self.transition(SessionState::Submitting)?;
        let models = self.models.clone();
        let delta = output.delta;
        let (payload_ref, content_hash) = tokio::task::spawn_blocking(move || {
            let content_hash = modelstore::digest(&delta);
            models.put(&delta).map(|reference| (reference, content_hash))
        })
        .await
        .map_err(|e| SessionError::Upload(e.to_string()))?
        .map_err(|e| SessionError::Upload(e.to_string()))?;

        let submission = Submission {
            round_id: assignment.round_id,
            participant_id: self.config.participant_id.clone(),
            payload_ref,
            content_hash,
            weight: output.weight,
        };
        self.submit_with_retry(&submission).await
    }

    /// Return the base for this round, pulling it if the local copy is stale
    async fn ensure_base(&mut self, assignment: &RoundAssignment) -> Result<Arc<Vec<u8>>, SessionError> {
        if let Some(local) = &self.local
            && local.version == assignment.base_version
            && local.payload_ref == assignment.base_ref
        {
            return Ok(Arc::clone(&local.bytes));
        }

        info!(
            participant_id = %self.config.participant_id,
            from = ?self.local_version(),
            to = assignment.base_version,
            "Pulling base model"
        );
        let model = self.fetch_version(assignment.base_version, &assignment.base_ref).await?;
        let bytes = Arc::clone(&model.bytes);
        self.local = Some(model);
        Ok(bytes)
    }

    async fn fetch_version(&self, version: VersionNumber, reference: &str) -> Result<LocalModel, SessionError> {
        let models = self.models.clone();
        let owned = reference.to_string();
        let bytes = tokio::task::spawn_blocking(move || models.get(&owned))
            .await
            .map_err(|e| SessionError::BaseUnavailable {
                reference: reference.to_string(),
                message: e.to_string(),
            })?
            .map_err(|e| match e {
                modelstore::StoreError::Corrupt { reference, actual } => SessionError::BaseIntegrity {
                    expected: reference,
                    actual,
                },
                other => SessionError::BaseUnavailable {
                    reference: reference.to_string(),
                    message: other.to_string(),
                },
            })?;

        let actual = modelstore::digest(&bytes);
        if actual != reference {
            return Err(SessionError::BaseIntegrity {
                expected: reference.to_string(),
                actual,
            });
        }

        Ok(LocalModel {
            version,
            payload_ref: reference.to_string(),
            bytes: Arc::new(bytes),
        })
    }

    async fn submit_with_retry(&self, submission: &Submission) -> Result<SubmitOutcome, SessionError> {
        let max_retries = self.config.submit_max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let backoff = self.config.submit_backoff(attempt);
                warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    round_id = submission.round_id,
                    "Retrying contribution submission"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.link.submit(submission).await {
                Ok(status) => {
                    info!(
                        participant_id = %submission.participant_id,
                        round_id = submission.round_id,
                        %status,
                        "Contribution accepted"
                    );
                    return Ok(SubmitOutcome::Accepted(status));
                }
                Err(SubmitError::Rejected {
                    reason: RejectReason::DuplicateContribution,
                    ..
                }) => {
                    info!(round_id = submission.round_id, "Contribution already recorded");
                    return Ok(SubmitOutcome::AlreadyRecorded);
                }
                Err(e) if e.is_transient() => {
                    debug!(attempt, error = %e, "Transient submission failure");
                    last_error = Some(e);
                }
                Err(SubmitError::Rejected { reason, message }) => {
                    return Err(SessionError::Rejected { reason, message });
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        Err(SessionError::RetriesExhausted {
            attempts: max_retries + 1,
            last: last_error.unwrap_or(SubmitError::Transport("no attempt made".to_string())),
        })
    }

    /// Leave `Error` for `Idle` after the configured cooldown
    pub async fn recover(&self) -> Result<(), SessionError> {
        if self.state() != SessionState::Error {
            return Ok(());
        }
        tokio::time::sleep(self.config.cooldown()).await;
        self.transition(SessionState::Idle)
    }

    /// Publish a liveness heartbeat
    pub async fn heartbeat(&self) -> Result<(), SessionError> {
        self.bus
            .publish(
                TELEMETRY_EDGE,
                &FederationMessage::Heartbeat {
                    participant_id: self.config.participant_id.clone(),
                    tier: self.trainer.tier().to_string(),
                    sent_at: self.clock.now_ms(),
                    local_version: self.local_version(),
                },
            )
            .await?;
        Ok(())
    }

    /// Run until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SessionError> {
        let mut control = self.bus.subscribe(CONTROL_ROUNDS).await?;
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(participant_id = %self.config.participant_id, tier = %self.trainer.tier(), "Edge session running");
        self.begin_waiting()?;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        warn!(error = %e, "Heartbeat failed");
                    }
                }
                message = control.recv() => {
                    let Some(message) = message else {
                        warn!("Control topic closed");
                        break;
                    };
                    let Some(assignment) = self.assignment(&message) else {
                        continue;
                    };
                    info!(
                        participant_id = %self.config.participant_id,
                        round_id = assignment.round_id,
                        base_version = assignment.base_version,
                        "Joining round"
                    );

                    if self.participate(&assignment).await.is_err() {
                        tokio::select! {
                            result = self.recover() => result?,
                            _ = shutdown.changed() => break,
                        }
                    }
                    self.begin_waiting()?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if self.state() == SessionState::AwaitingRound {
            self.transition(SessionState::Idle)?;
        }
        info!(participant_id = %self.config.participant_id, "Edge session stopped");
        Ok(())
    }
}
