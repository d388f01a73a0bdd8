//! StateManager - actor that owns the RoundStore
//!
//! Processes commands via channels for thread-safe access to persistent state.
//! Every status change in the system goes through this single task, which is
//! what makes the compare-and-swap in [`RoundStore::transition`] race-free.

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{
    Contribution, Eligibility, ModelVersion, Participant, Round, RoundId, RoundStatus, VersionNumber,
};

use super::messages::{NewVersion, StateCommand, StateError, StateResponse, TransitionPatch};
use super::store::{Completion, RoundStore};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager").finish_non_exhaustive()
    }
}

impl StateManager {
    /// Spawn a new StateManager actor over the store in `state_dir`
    pub fn spawn(state_dir: impl AsRef<Path>) -> StateResponse<Self> {
        debug!(state_dir = %state_dir.as_ref().display(), "spawn: called");
        let store = RoundStore::open(state_dir)?;
        Ok(Self::spawn_with_store(store))
    }

    /// Spawn over an in-memory store (tests, simulation)
    pub fn spawn_in_memory() -> StateResponse<Self> {
        debug!("spawn_in_memory: called");
        Ok(Self::spawn_with_store(RoundStore::open_in_memory()?))
    }

    fn spawn_with_store(store: RoundStore) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Round operations ===

    /// Persist a new round and return its assigned id
    pub async fn create_round(&self, round: Round) -> StateResponse<RoundId> {
        debug!(base_version = round.base_version, expected = round.expected.len(), "create_round: called");
        self.request(|reply| StateCommand::CreateRound { round, reply }).await
    }

    pub async fn get_round(&self, id: RoundId) -> StateResponse<Option<Round>> {
        debug!(id, "get_round: called");
        self.request(|reply| StateCommand::GetRound { id, reply }).await
    }

    /// Get a round by id, returning error if not found
    pub async fn get_round_required(&self, id: RoundId) -> StateResponse<Round> {
        debug!(id, "get_round_required: called");
        self.get_round(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("Round {}", id)))
    }

    pub async fn list_rounds(&self, status_filter: Option<RoundStatus>) -> StateResponse<Vec<Round>> {
        debug!(?status_filter, "list_rounds: called");
        self.request(|reply| StateCommand::ListRounds { status_filter, reply })
            .await
    }

    /// Rounds still accepting contributions
    pub async fn list_open_rounds(&self) -> StateResponse<Vec<Round>> {
        debug!("list_open_rounds: called");
        let mut rounds = self.list_rounds(Some(RoundStatus::Announced)).await?;
        rounds.extend(self.list_rounds(Some(RoundStatus::Collecting)).await?);
        rounds.sort_by_key(|r| r.id);
        Ok(rounds)
    }

    /// Open rounds whose deadline has passed
    pub async fn list_expired_open(&self, now_ms: i64) -> StateResponse<Vec<Round>> {
        debug!(now_ms, "list_expired_open: called");
        self.request(|reply| StateCommand::ListExpiredOpen { now_ms, reply })
            .await
    }

    /// Compare-and-swap a round's status; `Ok(false)` if another writer got there first
    pub async fn transition(
        &self,
        id: RoundId,
        from: RoundStatus,
        to: RoundStatus,
        patch: TransitionPatch,
        now_ms: i64,
    ) -> StateResponse<bool> {
        debug!(id, %from, %to, "transition: called");
        self.request(|reply| StateCommand::Transition {
            id,
            from,
            to,
            patch,
            now_ms,
            reply,
        })
        .await
    }

    pub async fn mark_announced(&self, id: RoundId, now_ms: i64) -> StateResponse<bool> {
        debug!(id, "mark_announced: called");
        self.request(|reply| StateCommand::MarkAnnounced { id, now_ms, reply })
            .await
    }

    // === Contribution operations ===

    pub async fn append_contribution(&self, contribution: Contribution) -> StateResponse<()> {
        debug!(
            round_id = contribution.round_id,
            participant_id = %contribution.participant_id,
            "append_contribution: called"
        );
        self.request(|reply| StateCommand::AppendContribution { contribution, reply })
            .await
    }

    pub async fn list_contributions(&self, round_id: RoundId) -> StateResponse<Vec<Contribution>> {
        debug!(round_id, "list_contributions: called");
        self.request(|reply| StateCommand::ListContributions { round_id, reply })
            .await
    }

    // === Model version operations ===

    /// Seed version 1 unless a version already exists; returns version 1
    pub async fn record_genesis(&self, version: NewVersion) -> StateResponse<ModelVersion> {
        debug!(payload_ref = %version.payload_ref, "record_genesis: called");
        self.request(|reply| StateCommand::RecordGenesis { version, reply })
            .await
    }

    /// Record the round's version and mark it aggregated, atomically
    pub async fn complete_round(&self, id: RoundId, version: NewVersion, now_ms: i64) -> StateResponse<Completion> {
        debug!(id, "complete_round: called");
        self.request(|reply| StateCommand::CompleteRound {
            id,
            version,
            now_ms,
            reply,
        })
        .await
    }

    pub async fn get_version(&self, version: VersionNumber) -> StateResponse<Option<ModelVersion>> {
        debug!(version, "get_version: called");
        self.request(|reply| StateCommand::GetVersion { version, reply })
            .await
    }

    pub async fn latest_version(&self) -> StateResponse<Option<ModelVersion>> {
        debug!("latest_version: called");
        self.request(|reply| StateCommand::LatestVersion { reply }).await
    }

    pub async fn list_versions(&self) -> StateResponse<Vec<ModelVersion>> {
        debug!("list_versions: called");
        self.request(|reply| StateCommand::ListVersions { reply }).await
    }

    // === Participant operations ===

    /// Record contact from a participant (contribution or heartbeat)
    pub async fn touch_participant(&self, id: &str, tier: Option<String>, now_ms: i64) -> StateResponse<Participant> {
        debug!(%id, ?tier, "touch_participant: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::TouchParticipant {
            id,
            tier,
            now_ms,
            reply,
        })
        .await
    }

    pub async fn get_participant(&self, id: &str) -> StateResponse<Option<Participant>> {
        debug!(%id, "get_participant: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetParticipant { id, reply }).await
    }

    pub async fn list_participants(&self) -> StateResponse<Vec<Participant>> {
        debug!("list_participants: called");
        self.request(|reply| StateCommand::ListParticipants { reply }).await
    }

    pub async fn set_eligibility(&self, id: &str, eligibility: Eligibility, now_ms: i64) -> StateResponse<()> {
        debug!(%id, %eligibility, "set_eligibility: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::SetEligibility {
            id,
            eligibility,
            now_ms,
            reply,
        })
        .await
    }

    /// Mark participants silent since `cutoff_ms` as stale
    pub async fn mark_stale(&self, cutoff_ms: i64) -> StateResponse<usize> {
        debug!(cutoff_ms, "mark_stale: called");
        self.request(|reply| StateCommand::MarkStale { cutoff_ms, reply })
            .await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// The actor loop - processes commands sequentially
async fn actor_loop(mut store: RoundStore, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateRound { round, reply } => {
                debug!("actor_loop: CreateRound command");
                let _ = reply.send(store.create_round(&round));
            }

            StateCommand::GetRound { id, reply } => {
                debug!(id, "actor_loop: GetRound command");
                let _ = reply.send(store.get_round(id));
            }

            StateCommand::ListRounds { status_filter, reply } => {
                debug!(?status_filter, "actor_loop: ListRounds command");
                let _ = reply.send(store.list_rounds(status_filter));
            }

            StateCommand::ListExpiredOpen { now_ms, reply } => {
                debug!(now_ms, "actor_loop: ListExpiredOpen command");
                let _ = reply.send(store.list_expired_open(now_ms));
            }

            StateCommand::Transition {
                id,
                from,
                to,
                patch,
                now_ms,
                reply,
            } => {
                debug!(id, %from, %to, "actor_loop: Transition command");
                let _ = reply.send(store.transition(id, from, to, &patch, now_ms));
            }

            StateCommand::MarkAnnounced { id, now_ms, reply } => {
                debug!(id, "actor_loop: MarkAnnounced command");
                let _ = reply.send(store.mark_announced(id, now_ms));
            }

            StateCommand::AppendContribution { contribution, reply } => {
                debug!(round_id = contribution.round_id, "actor_loop: AppendContribution command");
                let _ = reply.send(store.append_contribution(&contribution));
            }

            StateCommand::ListContributions { round_id, reply } => {
                debug!(round_id, "actor_loop: ListContributions command");
                let _ = reply.send(store.list_contributions(round_id));
            }

            StateCommand::RecordGenesis { version, reply } => {
                debug!("actor_loop: RecordGenesis command");
                let _ = reply.send(store.record_genesis(&version));
            }

            StateCommand::CompleteRound {
                id,
                version,
                now_ms,
                reply,
            } => {
                debug!(id, "actor_loop: CompleteRound command");
                let _ = reply.send(store.complete_round(id, &version, now_ms));
            }

            StateCommand::GetVersion { version, reply } => {
                debug!(version, "actor_loop: GetVersion command");
                let _ = reply.send(store.get_version(version));
            }

            StateCommand::LatestVersion { reply } => {
                debug!("actor_loop: LatestVersion command");
                let _ = reply.send(store.latest_version());
            }

            StateCommand::ListVersions { reply } => {
                debug!("actor_loop: ListVersions command");
                let _ = reply.send(store.list_versions());
            }

            StateCommand::TouchParticipant {
                id,
                tier,
                now_ms,
                reply,
            } => {
                debug!(%id, "actor_loop: TouchParticipant command");
                let _ = reply.send(store.touch_participant(&id, tier.as_deref(), now_ms));
            }

            StateCommand::GetParticipant { id, reply } => {
                debug!(%id, "actor_loop: GetParticipant command");
                let _ = reply.send(store.get_participant(&id));
            }

            StateCommand::ListParticipants { reply } => {
                debug!("actor_loop: ListParticipants command");
                let _ = reply.send(store.list_participants());
            }

            StateCommand::SetEligibility {
                id,
                eligibility,
                now_ms,
                reply,
            } => {
                debug!(%id, %eligibility, "actor_loop: SetEligibility command");
                let _ = reply.send(store.set_eligibility(&id, eligibility, now_ms));
            }

            StateCommand::MarkStale { cutoff_ms, reply } => {
                debug!(cutoff_ms, "actor_loop: MarkStale command");
                let _ = reply.send(store.mark_stale(cutoff_ms));
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AggregationPolicy;
    use tempfile::tempdir;

    fn round() -> Round {
        Round::new(1, ["edge-a", "edge-b"].map(String::from), AggregationPolicy::default(), 0)
    }

    #[tokio::test]
    async fn test_state_manager_round_crud() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let id = manager.create_round(round()).await.unwrap();
        let retrieved = manager.get_round(id).await.unwrap().unwrap();
        assert_eq!(retrieved.base_version, 1);

        let rounds = manager.list_rounds(Some(RoundStatus::Announced)).await.unwrap();
        assert_eq!(rounds.len(), 1);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_manager_get_nonexistent() {
        let manager = StateManager::spawn_in_memory().unwrap();
        assert!(manager.get_round(42).await.unwrap().is_none());
        assert!(matches!(
            manager.get_round_required(42).await,
            Err(StateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_cas_single_winner() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let id = manager.create_round(round()).await.unwrap();

        let mut handles = Vec::new();
        for target in [RoundStatus::Failed, RoundStatus::Closing, RoundStatus::Expired] {
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                m.transition(id, RoundStatus::Announced, target, TransitionPatch::default(), 1)
                    .await
                    .unwrap()
            }));
        }

        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_open_rounds_listing() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let a = manager.create_round(round()).await.unwrap();
        let b = manager.create_round(round()).await.unwrap();
        manager
            .transition(b, RoundStatus::Announced, RoundStatus::Collecting, TransitionPatch::default(), 1)
            .await
            .unwrap();
        let c = manager.create_round(round()).await.unwrap();
        manager
            .transition(c, RoundStatus::Announced, RoundStatus::Failed, TransitionPatch::default(), 1)
            .await
            .unwrap();

        let open: Vec<_> = manager.list_open_rounds().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(open, vec![a, b]);
    }

    #[tokio::test]
    async fn test_channel_closed_after_shutdown() {
        let manager = StateManager::spawn_in_memory().unwrap();
        manager.shutdown().await.unwrap();
        tokio::task::yield_now().await;
        // Give the actor a moment to drop its receiver
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(matches!(manager.get_round(1).await, Err(StateError::ChannelError)));
    }
}
