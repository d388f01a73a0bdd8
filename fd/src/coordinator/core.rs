//! Aggregation coordinator
//!
//! Drives every round through its lifecycle. The coordinator holds no round
//! state of its own: each decision re-reads the round from the state store
//! and every status change is a compare-and-swap, so many callers (client
//! submissions, the sweep, operator commands) can act concurrently and
//! exactly one of them wins any given transition.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use modelstore::ModelStore;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::alerts::{AlertKind, OperatorAlert};
use super::config::CoordinatorConfig;
use super::error::CoordError;
use super::retry::publish_with_retry;
use crate::aggregation::{Aggregator, MeanDelta, Update};
use crate::domain::{
    AggregationPolicy, Clock, CloseDecision, Contribution, ModelVersion, Round, RoundId, RoundStatus, SystemClock,
    VersionNumber,
};
use crate::messaging::{
    CONTROL_ROUNDS, FederationMessage, MessageBus, ReceiptOutcome, TELEMETRY_EDGE, UPDATES_EXPERTS,
};
use crate::state::{Completion, NewVersion, RecoveryStats, StateManager, StateResponse, TransitionPatch, scan_for_recovery};

/// CAS attempts before `cancel_round` gives up on a round that keeps moving
const CANCEL_ATTEMPTS: usize = 8;

/// A contribution as submitted by a participant
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub round_id: RoundId,
    pub participant_id: String,
    pub payload_ref: String,
    pub content_hash: String,
    pub weight: f64,
}

/// What one sweep pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub announced: usize,
    pub closed: usize,
    pub expired: usize,
    pub failed: usize,
    pub stale_participants: usize,
}

struct Inner {
    state: StateManager,
    models: ModelStore,
    bus: Arc<dyn MessageBus>,
    aggregator: Arc<dyn Aggregator>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    alerts: broadcast::Sender<OperatorAlert>,
}

/// Handle to the aggregation coordinator (cheap to clone)
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("aggregator", &self.inner.aggregator.name())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create a coordinator from explicit collaborators
    pub fn new(
        state: StateManager,
        models: ModelStore,
        bus: Arc<dyn MessageBus>,
        aggregator: Arc<dyn Aggregator>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        debug!(aggregator = aggregator.name(), "Coordinator::new: called");
        let (alerts, _) = broadcast::channel(config.alert_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                state,
                models,
                bus,
                aggregator,
                clock,
                config,
                alerts,
            }),
        }
    }

    /// Create a coordinator with the mean-delta aggregator and the system clock
    pub fn with_defaults(
        state: StateManager,
        models: ModelStore,
        bus: Arc<dyn MessageBus>,
        config: CoordinatorConfig,
    ) -> Self {
        Self::new(state, models, bus, Arc::new(MeanDelta), Arc::new(SystemClock), config)
    }

    pub fn state(&self) -> &StateManager {
        &self.inner.state
    }

    pub fn models(&self) -> &ModelStore {
        &self.inner.models
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Subscribe to operator alerts raised from now on
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<OperatorAlert> {
        self.inner.alerts.subscribe()
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    fn alert(&self, kind: AlertKind, round_id: Option<RoundId>, message: impl Into<String>) {
        let message = message.into();
        warn!(?kind, ?round_id, %message, "Operator alert");
        let _ = self.inner.alerts.send(OperatorAlert {
            kind,
            round_id,
            message,
            raised_at: self.now(),
        });
    }

    /// Run a state store call bounded by `store_timeout_ms`
    async fn st<T>(&self, call: impl Future<Output = StateResponse<T>>) -> Result<T, CoordError> {
        tokio::time::timeout(self.inner.config.store_timeout(), call)
            .await
            .map_err(|_| CoordError::Timeout("state store".to_string()))?
            .map_err(CoordError::from)
    }

    async fn load_payload(&self, reference: &str) -> Result<Vec<u8>, CoordError> {
        let models = self.inner.models.clone();
        let reference = reference.to_string();
        tokio::task::spawn_blocking(move || models.get(&reference))
            .await
            .map_err(|e| CoordError::Store(e.to_string()))?
            .map_err(CoordError::from)
    }

    async fn store_payload(&self, bytes: Vec<u8>) -> Result<String, CoordError> {
        let models = self.inner.models.clone();
        tokio::task::spawn_blocking(move || models.put(&bytes))
            .await
            .map_err(|e| CoordError::Store(e.to_string()))?
            .map_err(CoordError::from)
    }

    async fn version_required(&self, version: VersionNumber) -> Result<ModelVersion, CoordError> {
        self.st(self.inner.state.get_version(version))
            .await?
            .ok_or_else(|| CoordError::NotFound(format!("model version {}", version)))
    }

    async fn round_required(&self, round_id: RoundId) -> Result<Round, CoordError> {
        self.st(self.inner.state.get_round(round_id))
            .await?
            .ok_or(CoordError::UnknownRound(round_id))
    }

    // === Model versions ===

    /// Seed version 1 from `bytes`
    ///
    /// Repeating the call with identical bytes returns the existing genesis;
    /// different bytes once a genesis exists are rejected.
    pub async fn publish_genesis(&self, bytes: Vec<u8>) -> Result<ModelVersion, CoordError> {
        debug!(size = bytes.len(), "Coordinator::publish_genesis: called");
        let payload_ref = self.store_payload(bytes).await?;

        let genesis = self
            .st(self.inner.state.record_genesis(NewVersion {
                parent: None,
                payload_ref: payload_ref.clone(),
                content_hash: payload_ref.clone(),
                round_id: None,
                contributors: Vec::new(),
                created_at: self.now(),
            }))
            .await?;
        if genesis.payload_ref != payload_ref {
            return Err(CoordError::InvalidState(format!(
                "genesis already published as {}",
                genesis.payload_ref
            )));
        }
        info!(version = genesis.version, payload_ref = %genesis.payload_ref, "Genesis model available");
        Ok(genesis)
    }

    // === Round lifecycle ===

    /// Open a new round against `base_version` and announce it
    pub async fn start_round(
        &self,
        base_version: VersionNumber,
        participants: impl IntoIterator<Item = String>,
        policy: AggregationPolicy,
    ) -> Result<RoundId, CoordError> {
        let round_id = self.create_round(base_version, participants, policy).await?;
        let round = self.round_required(round_id).await?;

        if let Err(e) = self.announce(&round).await {
            return Err(self.fail_unannounced(&round, e).await);
        }
        Ok(round_id)
    }

    /// Validate and persist a round without announcing it
    ///
    /// The announcement is owed from here on; a running coordinator's sweep
    /// (or [`Coordinator::start_round`]) delivers it.
    pub async fn create_round(
        &self,
        base_version: VersionNumber,
        participants: impl IntoIterator<Item = String>,
        policy: AggregationPolicy,
    ) -> Result<RoundId, CoordError> {
        let expected: BTreeSet<String> = participants.into_iter().collect();
        debug!(base_version, expected = expected.len(), ?policy, "Coordinator::create_round: called");

        policy
            .validate(expected.len())
            .map_err(CoordError::InvalidPolicy)?;
        self.version_required(base_version).await?;

        let round = Round::new(base_version, expected, policy, self.now());
        let round_id = self.st(self.inner.state.create_round(round)).await?;
        info!(round_id, base_version, "Created round");
        Ok(round_id)
    }

    /// Publish the round-start announcement with the round's stored base
    async fn announce(&self, round: &Round) -> Result<(), CoordError> {
        let base = self.version_required(round.base_version).await?;
        let message = FederationMessage::RoundStarted {
            round_id: round.id,
            base_version: round.base_version,
            base_ref: base.payload_ref,
            participants: round.expected.iter().cloned().collect(),
            deadline: round.deadline,
            policy: round.policy,
        };

        let attempts = publish_with_retry(self.inner.bus.as_ref(), CONTROL_ROUNDS, &message, &self.inner.config).await?;
        self.st(self.inner.state.mark_announced(round.id, self.now())).await?;
        info!(round_id = round.id, attempts, "Announced round");
        Ok(())
    }

    /// Mark a round whose announcement could not be delivered as Failed
    async fn fail_unannounced(&self, round: &Round, cause: CoordError) -> CoordError {
        let reason = format!("announcement not delivered: {}", cause);
        error!(round_id = round.id, %reason, "Round announcement failed");

        match self
            .st(self.inner.state.transition(
                round.id,
                round.status,
                RoundStatus::Failed,
                TransitionPatch::failed(&reason),
                self.now(),
            ))
            .await
        {
            Ok(true) => {
                self.alert(AlertKind::AnnounceFailed, Some(round.id), &reason);
                CoordError::Failed {
                    round_id: round.id,
                    reason,
                }
            }
            Ok(false) => cause,
            Err(e) => e,
        }
    }

    /// Publish the terminal outcome of a round; failure only raises an alert
    async fn publish_round_end(&self, round_id: RoundId, status: RoundStatus, version: Option<&ModelVersion>) {
        let message = FederationMessage::RoundEnded {
            round_id,
            status,
            version: version.map(|v| v.version),
            payload_ref: version.map(|v| v.payload_ref.clone()),
        };
        if let Err(e) = publish_with_retry(self.inner.bus.as_ref(), CONTROL_ROUNDS, &message, &self.inner.config).await {
            self.alert(
                AlertKind::RoundEndUnpublished,
                Some(round_id),
                format!("round ended as {} but the announcement failed: {}", status, e),
            );
        }
    }

    /// Accept or reject a participant's contribution
    ///
    /// On acceptance the round is re-evaluated and its resulting status returned.
    pub async fn submit_contribution(&self, submission: Submission) -> Result<RoundStatus, CoordError> {
        let Submission {
            round_id,
            participant_id,
            payload_ref,
            content_hash,
            weight,
        } = submission;
        debug!(round_id, %participant_id, %payload_ref, "Coordinator::submit_contribution: called");

        let round = self.round_required(round_id).await?;
        if !round.status.accepts_contributions() {
            return Err(CoordError::UnknownRound(round_id));
        }

        let suspended = self
            .st(self.inner.state.get_participant(&participant_id))
            .await?
            .is_some_and(|p| p.is_suspended());
        if !round.is_expected(&participant_id) || suspended {
            return Err(CoordError::UnexpectedParticipant {
                round_id,
                participant_id,
            });
        }

        if round.contributed.contains(&participant_id) {
            return Err(CoordError::DuplicateContribution {
                round_id,
                participant_id,
            });
        }

        let delta = self.load_payload(&payload_ref).await?;
        let actual = modelstore::digest(&delta);
        if actual != content_hash {
            warn!(round_id, %participant_id, claimed = %content_hash, %actual, "Contribution hash mismatch");
            return Err(CoordError::IntegrityMismatch {
                claimed: content_hash,
                actual,
            });
        }

        if !weight.is_finite() || weight <= 0.0 {
            return Err(CoordError::Malformed(format!("weight must be positive, got {}", weight)));
        }
        let base = self.version_required(round.base_version).await?;
        let base_bytes = self.load_payload(&base.payload_ref).await?;
        self.inner.aggregator.validate(&base_bytes, &delta)?;

        let now = self.now();
        self.st(self.inner.state.append_contribution(Contribution::new(
            round_id,
            participant_id.clone(),
            payload_ref,
            content_hash,
            weight,
            now,
        )))
        .await?;
        info!(round_id, %participant_id, "Accepted contribution");

        if round.status == RoundStatus::Announced {
            self.st(self.inner.state.transition(
                round_id,
                RoundStatus::Announced,
                RoundStatus::Collecting,
                TransitionPatch::default(),
                now,
            ))
            .await?;
        }
        self.st(self.inner.state.touch_participant(&participant_id, None, now))
            .await?;

        match self.evaluate_round(round_id).await? {
            // Expired rounds never carry contributions
            RoundStatus::Expired => Err(CoordError::UnknownRound(round_id)),
            status => Ok(status),
        }
    }

    /// Apply the closing criteria to a round and act on them
    pub async fn evaluate_round(&self, round_id: RoundId) -> Result<RoundStatus, CoordError> {
        let round = self.round_required(round_id).await?;
        debug!(round_id, status = %round.status, count = round.contribution_count(), "Coordinator::evaluate_round: called");

        match round.status {
            status if status.is_terminal() => return Ok(status),
            RoundStatus::Closing => return self.finish_round(round_id).await,
            _ => {}
        }

        match round.closing_decision(self.now()) {
            CloseDecision::Wait => Ok(round.status),
            CloseDecision::Expire => {
                let won = self
                    .st(self.inner.state.transition(
                        round_id,
                        round.status,
                        RoundStatus::Expired,
                        TransitionPatch::failed("deadline passed with no contributions"),
                        self.now(),
                    ))
                    .await?;
                if !won {
                    return Ok(self.round_required(round_id).await?.status);
                }
                info!(round_id, "Round expired");
                self.alert(
                    AlertKind::RoundExpired,
                    Some(round_id),
                    "deadline passed with no contributions",
                );
                self.publish_round_end(round_id, RoundStatus::Expired, None).await;
                Ok(RoundStatus::Expired)
            }
            CloseDecision::Close { partial } => {
                let won = self
                    .st(self.inner.state.transition(
                        round_id,
                        round.status,
                        RoundStatus::Closing,
                        TransitionPatch::default(),
                        self.now(),
                    ))
                    .await?;
                if !won {
                    return Ok(self.round_required(round_id).await?.status);
                }
                info!(round_id, partial, contributions = round.contribution_count(), "Closing round");
                self.finish_round(round_id).await
            }
        }
    }

    /// Aggregate a Closing round; non-transient failures fail the round
    async fn finish_round(&self, round_id: RoundId) -> Result<RoundStatus, CoordError> {
        match self.aggregate(round_id).await {
            Ok(_) => Ok(RoundStatus::Aggregated),
            Err(e) if e.is_transient() => {
                warn!(round_id, error = %e, "Aggregation deferred to next sweep");
                Err(e)
            }
            Err(CoordError::Failed { .. }) => Ok(self.round_required(round_id).await?.status),
            Err(e) => {
                let reason = format!("aggregation failed: {}", e);
                let won = self
                    .st(self.inner.state.transition(
                        round_id,
                        RoundStatus::Closing,
                        RoundStatus::Failed,
                        TransitionPatch::failed(&reason),
                        self.now(),
                    ))
                    .await?;
                if won {
                    error!(round_id, %reason, "Round failed");
                    self.alert(AlertKind::AggregationFailed, Some(round_id), &reason);
                    self.publish_round_end(round_id, RoundStatus::Failed, None).await;
                }
                Ok(self.round_required(round_id).await?.status)
            }
        }
    }

    /// Produce (or return) the model version for a closing/aggregated round
    ///
    /// A pure function of the accepted contributions, the base payload and the
    /// aggregator. On an aggregated round the recorded version is returned
    /// without recomputation.
    pub async fn aggregate(&self, round_id: RoundId) -> Result<ModelVersion, CoordError> {
        let round = self.round_required(round_id).await?;
        debug!(round_id, status = %round.status, "Coordinator::aggregate: called");

        match round.status {
            RoundStatus::Aggregated => return self.recorded_version(&round).await,
            RoundStatus::Closing => {}
            RoundStatus::Failed => {
                return Err(CoordError::Failed {
                    round_id,
                    reason: round.failure_reason.unwrap_or_default(),
                });
            }
            other => {
                return Err(CoordError::InvalidState(format!(
                    "round {} is {}, not closing",
                    round_id, other
                )));
            }
        }

        let contributions = self.st(self.inner.state.list_contributions(round_id)).await?;
        if contributions.is_empty() {
            return Err(CoordError::InvalidState(format!("round {} has no contributions", round_id)));
        }

        let base = self.version_required(round.base_version).await?;
        let base_bytes = self.load_payload(&base.payload_ref).await?;

        let mut updates = Vec::with_capacity(contributions.len());
        for c in &contributions {
            let delta = self.load_payload(&c.payload_ref).await?;
            let actual = modelstore::digest(&delta);
            if actual != c.content_hash {
                return Err(CoordError::IntegrityMismatch {
                    claimed: c.content_hash.clone(),
                    actual,
                });
            }
            updates.push(Update {
                participant_id: c.participant_id.clone(),
                weight: c.weight,
                delta,
            });
        }
        updates.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        let contributors: Vec<String> = updates.iter().map(|u| u.participant_id.clone()).collect();

        let aggregator = Arc::clone(&self.inner.aggregator);
        let merged = tokio::task::spawn_blocking(move || aggregator.aggregate(&base_bytes, &updates))
            .await
            .map_err(|e| CoordError::Store(e.to_string()))??;
        let payload_ref = self.store_payload(merged).await?;

        let completion = self
            .st(self.inner.state.complete_round(
                round_id,
                NewVersion {
                    parent: Some(round.base_version),
                    payload_ref: payload_ref.clone(),
                    content_hash: payload_ref,
                    round_id: Some(round_id),
                    contributors,
                    created_at: self.now(),
                },
                self.now(),
            ))
            .await?;

        match completion {
            Completion::Completed(version) => {
                info!(round_id, version = version.version, "Aggregated round");
                self.publish_round_end(round_id, RoundStatus::Aggregated, Some(&version))
                    .await;
                Ok(version)
            }
            Completion::AlreadyAggregated(version) => Ok(version),
            Completion::NotClosing(status) => {
                let round = self.round_required(round_id).await?;
                Err(CoordError::Failed {
                    round_id,
                    reason: round
                        .failure_reason
                        .unwrap_or_else(|| format!("round became {} during aggregation", status)),
                })
            }
        }
    }

    async fn recorded_version(&self, round: &Round) -> Result<ModelVersion, CoordError> {
        let version = round
            .result_version
            .ok_or_else(|| CoordError::InvalidState(format!("round {} has no result version", round.id)))?;
        self.version_required(version).await
    }

    /// Force a round to Failed
    ///
    /// Returns `true` if this call made the transition and `false` if the round
    /// had already reached a terminal status.
    pub async fn cancel_round(&self, round_id: RoundId, reason: &str) -> Result<bool, CoordError> {
        debug!(round_id, %reason, "Coordinator::cancel_round: called");

        for _ in 0..CANCEL_ATTEMPTS {
            let round = self.round_required(round_id).await?;
            if round.is_terminal() {
                debug!(round_id, status = %round.status, "Coordinator::cancel_round: already terminal");
                return Ok(false);
            }

            let won = self
                .st(self.inner.state.transition(
                    round_id,
                    round.status,
                    RoundStatus::Failed,
                    TransitionPatch::failed(format!("cancelled: {}", reason)),
                    self.now(),
                ))
                .await?;
            if won {
                info!(round_id, %reason, "Round cancelled");
                self.alert(AlertKind::RoundCancelled, Some(round_id), reason);
                self.publish_round_end(round_id, RoundStatus::Failed, None).await;
                return Ok(true);
            }
        }

        Err(CoordError::InvalidState(format!(
            "round {} kept changing while cancelling",
            round_id
        )))
    }

    // === Sweep and recovery ===

    /// One pass of the recurring sweep
    ///
    /// Re-announces owed announcements (with the stored base version),
    /// finishes rounds left in Closing, evaluates every open round against its
    /// deadline and marks silent participants stale. Per-round errors are
    /// logged and do not abort the pass.
    pub async fn sweep(&self) -> Result<SweepReport, CoordError> {
        let now = self.now();
        debug!(now, "Coordinator::sweep: called");
        let mut report = SweepReport::default();

        let plan = self.st(scan_for_recovery(&self.inner.state, now)).await?;

        for round in &plan.to_announce {
            match self.announce(round).await {
                Ok(()) => report.announced += 1,
                Err(e) => {
                    let _ = self.fail_unannounced(round, e).await;
                    report.failed += 1;
                }
            }
        }

        for round in &plan.to_finish {
            self.tally(round.id, self.finish_round(round.id).await, &mut report);
        }

        for round in self.st(self.inner.state.list_open_rounds()).await? {
            self.tally(round.id, self.evaluate_round(round.id).await, &mut report);
        }

        let cutoff = now.saturating_sub(self.inner.config.participant_timeout_ms());
        report.stale_participants = self.st(self.inner.state.mark_stale(cutoff)).await?;

        if report != SweepReport::default() {
            info!(?report, "Sweep complete");
        }
        Ok(report)
    }

    fn tally(&self, round_id: RoundId, outcome: Result<RoundStatus, CoordError>, report: &mut SweepReport) {
        match outcome {
            Ok(RoundStatus::Aggregated) => report.closed += 1,
            Ok(RoundStatus::Expired) => report.expired += 1,
            Ok(RoundStatus::Failed) => report.failed += 1,
            Ok(_) => {}
            Err(e) => warn!(round_id, error = %e, "Sweep could not settle round"),
        }
    }

    /// Report incomplete work left by a previous run, then repair it
    pub async fn recover(&self) -> Result<RecoveryStats, CoordError> {
        let plan = self.st(scan_for_recovery(&self.inner.state, self.now())).await?;
        let stats = plan.stats();
        if !stats.is_empty() {
            info!(%stats, "Recovering incomplete rounds");
            self.sweep().await?;
        }
        Ok(stats)
    }

    // === Bus consumers ===

    /// Handle a submission that arrived over the bus and publish the receipt
    pub async fn handle_submission_message(&self, message: FederationMessage) {
        let FederationMessage::ContributionSubmitted {
            request_id,
            round_id,
            participant_id,
            payload_ref,
            content_hash,
            weight,
        } = message
        else {
            return;
        };

        let outcome = match self
            .submit_contribution(Submission {
                round_id,
                participant_id: participant_id.clone(),
                payload_ref,
                content_hash,
                weight,
            })
            .await
        {
            Ok(round_status) => ReceiptOutcome::Accepted { round_status },
            Err(e) => {
                debug!(round_id, %participant_id, error = %e, "Rejected contribution");
                ReceiptOutcome::Rejected {
                    reason: e.reject_reason(),
                    message: e.to_string(),
                }
            }
        };

        let receipt = FederationMessage::ContributionReceipt {
            request_id,
            round_id,
            participant_id,
            outcome,
        };
        if let Err(e) = publish_with_retry(self.inner.bus.as_ref(), CONTROL_ROUNDS, &receipt, &self.inner.config).await {
            warn!(round_id, error = %e, "Failed to publish contribution receipt");
        }
    }

    async fn handle_heartbeat(&self, message: FederationMessage) {
        if let FederationMessage::Heartbeat {
            participant_id, tier, ..
        } = message
            && let Err(e) = self
                .st(self.inner.state.touch_participant(&participant_id, Some(tier), self.now()))
                .await
        {
            warn!(%participant_id, error = %e, "Failed to record heartbeat");
        }
    }

    /// Run until `shutdown` flips to true
    ///
    /// Sweeps on a fixed interval, consumes contribution submissions (each
    /// handled on its own task) and heartbeats.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoordError> {
        let mut updates = self.inner.bus.subscribe(UPDATES_EXPERTS).await?;
        let mut telemetry = self.inner.bus.subscribe(TELEMETRY_EDGE).await?;
        let mut ticker = tokio::time::interval(self.inner.config.sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval = ?self.inner.config.sweep_interval(), "Coordinator running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "Sweep failed");
                    }
                }
                message = updates.recv() => match message {
                    Some(message) => {
                        let coordinator = self.clone();
                        tokio::spawn(async move { coordinator.handle_submission_message(message).await });
                    }
                    None => {
                        warn!("Updates topic closed");
                        break;
                    }
                },
                message = telemetry.recv() => match message {
                    Some(message) => self.handle_heartbeat(message).await,
                    None => {
                        warn!("Telemetry topic closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Coordinator shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}
