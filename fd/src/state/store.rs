//! SQLite-backed round store
//!
//! Synchronous; owned exclusively by the StateManager actor. Every status
//! change is a compare-and-swap on the `status` column, and the contributions
//! primary key makes the duplicate check part of the insert.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info};

use crate::domain::{
    AggregationPolicy, Contribution, Eligibility, ModelVersion, Participant, Round, RoundId, RoundStatus,
    VersionNumber,
};

use super::messages::{NewVersion, StateError, StateResponse, TransitionPatch};

/// Database file name inside the state directory
pub const DB_FILE: &str = "fednest.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rounds (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    status           TEXT    NOT NULL,
    base_version     INTEGER NOT NULL,
    expected         TEXT    NOT NULL,
    min_contributors INTEGER NOT NULL,
    timeout_secs     INTEGER NOT NULL,
    all_or_nothing   INTEGER NOT NULL,
    created_at       INTEGER NOT NULL,
    deadline         INTEGER NOT NULL,
    announced_at     INTEGER,
    result_version   INTEGER,
    failure_reason   TEXT,
    updated_at       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rounds_status ON rounds(status);

CREATE TABLE IF NOT EXISTS contributions (
    round_id       INTEGER NOT NULL REFERENCES rounds(id),
    participant_id TEXT    NOT NULL,
    payload_ref    TEXT    NOT NULL,
    content_hash   TEXT    NOT NULL,
    weight         REAL    NOT NULL,
    received_at    INTEGER NOT NULL,
    PRIMARY KEY (round_id, participant_id)
);

CREATE TABLE IF NOT EXISTS versions (
    version      INTEGER PRIMARY KEY,
    parent       INTEGER,
    payload_ref  TEXT    NOT NULL,
    content_hash TEXT    NOT NULL,
    round_id     INTEGER UNIQUE,
    contributors TEXT    NOT NULL,
    created_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS participants (
    id          TEXT PRIMARY KEY,
    last_seen   INTEGER NOT NULL,
    eligibility TEXT    NOT NULL,
    tier        TEXT
);
"#;

const ROUND_COLUMNS: &str = "id, status, base_version, expected, min_contributors, timeout_secs, all_or_nothing, \
     created_at, deadline, announced_at, result_version, failure_reason, updated_at";

const VERSION_COLUMNS: &str = "version, parent, payload_ref, content_hash, round_id, contributors, created_at";

/// Round rows before the derived `contributed` set is attached
struct RoundRow {
    round: Round,
    expected_json: String,
    status_text: String,
}

fn round_from_row(row: &Row<'_>) -> rusqlite::Result<RoundRow> {
    let round = Round {
        id: row.get::<_, i64>(0)? as RoundId,
        status: RoundStatus::Announced,
        base_version: row.get::<_, i64>(2)? as VersionNumber,
        expected: BTreeSet::new(),
        contributed: BTreeSet::new(),
        policy: AggregationPolicy {
            min_contributors: row.get::<_, i64>(4)? as u32,
            timeout_secs: row.get::<_, i64>(5)? as u64,
            all_or_nothing: row.get::<_, bool>(6)?,
        },
        created_at: row.get(7)?,
        deadline: row.get(8)?,
        announced_at: row.get(9)?,
        result_version: row.get::<_, Option<i64>>(10)?.map(|v| v as VersionNumber),
        failure_reason: row.get(11)?,
        updated_at: row.get(12)?,
    };
    Ok(RoundRow {
        round,
        status_text: row.get(1)?,
        expected_json: row.get(3)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<(ModelVersion, String)> {
    let version = ModelVersion {
        version: row.get::<_, i64>(0)? as VersionNumber,
        parent: row.get::<_, Option<i64>>(1)?.map(|v| v as VersionNumber),
        payload_ref: row.get(2)?,
        content_hash: row.get(3)?,
        round_id: row.get::<_, Option<i64>>(4)?.map(|v| v as RoundId),
        contributors: Vec::new(),
        created_at: row.get(6)?,
    };
    Ok((version, row.get(5)?))
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<(Participant, String)> {
    let participant = Participant {
        id: row.get(0)?,
        last_seen: row.get(1)?,
        eligibility: Eligibility::Active,
        tier: row.get(3)?,
    };
    Ok((participant, row.get(2)?))
}

fn contribution_from_row(row: &Row<'_>) -> rusqlite::Result<Contribution> {
    Ok(Contribution {
        round_id: row.get::<_, i64>(0)? as RoundId,
        participant_id: row.get(1)?,
        payload_ref: row.get(2)?,
        content_hash: row.get(3)?,
        weight: row.get(4)?,
        received_at: row.get(5)?,
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

fn finish_version((mut version, contributors): (ModelVersion, String)) -> StateResponse<ModelVersion> {
    version.contributors = serde_json::from_str(&contributors)?;
    Ok(version)
}

fn query_version(conn: &Connection, clause: &str, param: i64) -> StateResponse<Option<ModelVersion>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM versions WHERE {}", VERSION_COLUMNS, clause),
            params![param],
            version_from_row,
        )
        .optional()?;
    row.map(finish_version).transpose()
}

fn insert_version(conn: &Connection, new: &NewVersion) -> StateResponse<ModelVersion> {
    let next: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) + 1 FROM versions", [], |row| row.get(0))?;
    let contributors = serde_json::to_string(&new.contributors)?;
    conn.execute(
        &format!("INSERT INTO versions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", VERSION_COLUMNS),
        params![
            next,
            new.parent.map(|v| v as i64),
            new.payload_ref,
            new.content_hash,
            new.round_id.map(|r| r as i64),
            contributors,
            new.created_at,
        ],
    )?;
    Ok(ModelVersion {
        version: next as VersionNumber,
        parent: new.parent,
        payload_ref: new.payload_ref.clone(),
        content_hash: new.content_hash.clone(),
        round_id: new.round_id,
        contributors: new.contributors.clone(),
        created_at: new.created_at,
    })
}

/// Outcome of [`RoundStore::complete_round`]
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// This call recorded the version and aggregated the round
    Completed(ModelVersion),
    /// The round was already aggregated with this version
    AlreadyAggregated(ModelVersion),
    /// The round left Closing some other way
    NotClosing(RoundStatus),
}

/// Durable store for rounds, contributions, versions and participants
pub struct RoundStore {
    conn: Connection,
}

impl RoundStore {
    /// Open (or create) the store inside `state_dir`
    pub fn open(state_dir: impl AsRef<Path>) -> StateResponse<Self> {
        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir).map_err(|e| StateError::StoreError(e.to_string()))?;
        let conn = Connection::open(state_dir.join(DB_FILE))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> StateResponse<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StateResponse<Self> {
        conn.execute_batch(SCHEMA)?;
        info!("Round store schema ready");
        Ok(Self { conn })
    }

    // === Rounds ===

    pub fn create_round(&self, round: &Round) -> StateResponse<RoundId> {
        debug!(base_version = round.base_version, "RoundStore::create_round: called");
        let expected = serde_json::to_string(&round.expected)?;
        self.conn.execute(
            "INSERT INTO rounds (status, base_version, expected, min_contributors, timeout_secs, all_or_nothing, \
             created_at, deadline, announced_at, result_version, failure_reason, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                round.status.as_str(),
                round.base_version as i64,
                expected,
                round.policy.min_contributors as i64,
                round.policy.timeout_secs as i64,
                round.policy.all_or_nothing,
                round.created_at,
                round.deadline,
                round.announced_at,
                round.result_version.map(|v| v as i64),
                round.failure_reason,
                round.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid() as RoundId)
    }

    fn finish_round(&self, row: RoundRow) -> StateResponse<Round> {
        let mut round = row.round;
        round.status = row
            .status_text
            .parse()
            .map_err(StateError::DeserializationError)?;
        round.expected = serde_json::from_str(&row.expected_json)?;
        round.contributed = self.contributors(round.id)?;
        Ok(round)
    }

    fn contributors(&self, round_id: RoundId) -> StateResponse<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT participant_id FROM contributions WHERE round_id = ?1")?;
        let ids = stmt
            .query_map(params![round_id as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn get_round(&self, id: RoundId) -> StateResponse<Option<Round>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM rounds WHERE id = ?1", ROUND_COLUMNS),
                params![id as i64],
                round_from_row,
            )
            .optional()?;
        row.map(|r| self.finish_round(r)).transpose()
    }

    pub fn list_rounds(&self, status_filter: Option<RoundStatus>) -> StateResponse<Vec<Round>> {
        let rows = match status_filter {
            Some(status) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM rounds WHERE status = ?1 ORDER BY id",
                    ROUND_COLUMNS
                ))?;
                stmt.query_map(params![status.as_str()], round_from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT {} FROM rounds ORDER BY id", ROUND_COLUMNS))?;
                stmt.query_map([], round_from_row)?.collect::<Result<Vec<_>, _>>()?
            }
        };
        rows.into_iter().map(|r| self.finish_round(r)).collect()
    }

    /// Open rounds whose deadline is at or before `now_ms`
    pub fn list_expired_open(&self, now_ms: i64) -> StateResponse<Vec<Round>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM rounds WHERE status IN ('announced', 'collecting') AND deadline <= ?1 ORDER BY id",
            ROUND_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![now_ms], round_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| self.finish_round(r)).collect()
    }

    /// Compare-and-swap the round status
    ///
    /// Returns `Ok(false)` when the round is not currently in `from`. A move
    /// to `Expired` also loses once the round holds any contribution.
    pub fn transition(
        &self,
        id: RoundId,
        from: RoundStatus,
        to: RoundStatus,
        patch: &TransitionPatch,
        now_ms: i64,
    ) -> StateResponse<bool> {
        if !from.can_transition_to(to) {
            return Err(StateError::IllegalTransition { from, to });
        }
        let guard = if to == RoundStatus::Expired {
            " AND NOT EXISTS (SELECT 1 FROM contributions WHERE round_id = ?5)"
        } else {
            ""
        };
        let changed = self.conn.execute(
            &format!(
                "UPDATE rounds SET status = ?1, \
                     result_version = COALESCE(?2, result_version), \
                     failure_reason = COALESCE(?3, failure_reason), \
                     updated_at = ?4 \
                 WHERE id = ?5 AND status = ?6{}",
                guard
            ),
            params![
                to.as_str(),
                patch.result_version.map(|v| v as i64),
                patch.failure_reason,
                now_ms,
                id as i64,
                from.as_str(),
            ],
        )?;
        debug!(round_id = id, %from, %to, changed, "RoundStore::transition: applied");
        Ok(changed == 1)
    }

    /// Record that the round-start announcement went out (first time only)
    pub fn mark_announced(&self, id: RoundId, now_ms: i64) -> StateResponse<bool> {
        let changed = self.conn.execute(
            "UPDATE rounds SET announced_at = ?1, updated_at = ?1 WHERE id = ?2 AND announced_at IS NULL",
            params![now_ms, id as i64],
        )?;
        Ok(changed == 1)
    }

    // === Contributions ===

    /// Append a contribution; rejects duplicates and closed rounds in one transaction
    pub fn append_contribution(&mut self, c: &Contribution) -> StateResponse<()> {
        let tx = self.conn.transaction()?;

        let status_text: Option<String> = tx
            .query_row(
                "SELECT status FROM rounds WHERE id = ?1",
                params![c.round_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        let status: RoundStatus = status_text
            .ok_or_else(|| StateError::NotFound(format!("Round {}", c.round_id)))?
            .parse()
            .map_err(StateError::DeserializationError)?;
        if !status.accepts_contributions() {
            return Err(StateError::RoundClosed {
                round_id: c.round_id,
                status,
            });
        }

        let inserted = tx.execute(
            "INSERT INTO contributions (round_id, participant_id, payload_ref, content_hash, weight, received_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                c.round_id as i64,
                c.participant_id,
                c.payload_ref,
                c.content_hash,
                c.weight,
                c.received_at,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StateError::Duplicate {
                    round_id: c.round_id,
                    participant_id: c.participant_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        Ok(())
    }

    /// Contributions for a round, sorted by participant id
    pub fn list_contributions(&self, round_id: RoundId) -> StateResponse<Vec<Contribution>> {
        let mut stmt = self.conn.prepare(
            "SELECT round_id, participant_id, payload_ref, content_hash, weight, received_at \
             FROM contributions WHERE round_id = ?1 ORDER BY participant_id",
        )?;
        let rows = stmt
            .query_map(params![round_id as i64], contribution_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // === Versions ===

    fn version_where(&self, clause: &str, param: i64) -> StateResponse<Option<ModelVersion>> {
        query_version(&self.conn, clause, param)
    }

    /// Record the genesis version unless any version exists
    ///
    /// Returns version 1 either way. The check and the insert share one
    /// immediate transaction, so concurrent writers (in-process or not) cannot
    /// both seed the store.
    pub fn record_genesis(&mut self, new: &NewVersion) -> StateResponse<ModelVersion> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(existing) = query_version(&tx, "version = ?1", 1)? {
            debug!(payload_ref = %existing.payload_ref, "RoundStore::record_genesis: already recorded");
            return Ok(existing);
        }

        let genesis = NewVersion {
            parent: None,
            round_id: None,
            contributors: Vec::new(),
            ..new.clone()
        };
        let version = insert_version(&tx, &genesis)?;
        tx.commit()?;

        info!(version = version.version, payload_ref = %version.payload_ref, "Recorded genesis version");
        Ok(version)
    }

    /// Record the round's version and move it `Closing -> Aggregated` in one transaction
    ///
    /// A round that is already aggregated returns its recorded version; a round
    /// in any other status (e.g. cancelled meanwhile) records nothing.
    pub fn complete_round(&mut self, id: RoundId, new: &NewVersion, now_ms: i64) -> StateResponse<Completion> {
        let tx = self.conn.transaction()?;

        let status_text: Option<String> = tx
            .query_row("SELECT status FROM rounds WHERE id = ?1", params![id as i64], |row| row.get(0))
            .optional()?;
        let status: RoundStatus = status_text
            .ok_or_else(|| StateError::NotFound(format!("Round {}", id)))?
            .parse()
            .map_err(StateError::DeserializationError)?;

        match status {
            RoundStatus::Closing => {}
            RoundStatus::Aggregated => {
                let existing = query_version(&tx, "round_id = ?1", id as i64)?
                    .ok_or_else(|| StateError::NotFound(format!("Version for round {}", id)))?;
                return Ok(Completion::AlreadyAggregated(existing));
            }
            other => return Ok(Completion::NotClosing(other)),
        }

        let version = match query_version(&tx, "round_id = ?1", id as i64)? {
            Some(existing) => existing,
            None => insert_version(&tx, new)?,
        };
        tx.execute(
            "UPDATE rounds SET status = 'aggregated', result_version = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = 'closing'",
            params![version.version as i64, now_ms, id as i64],
        )?;
        tx.commit()?;

        info!(round_id = id, version = version.version, "Round aggregated");
        Ok(Completion::Completed(version))
    }

    pub fn get_version(&self, version: VersionNumber) -> StateResponse<Option<ModelVersion>> {
        self.version_where("version = ?1", version as i64)
    }

    pub fn latest_version(&self) -> StateResponse<Option<ModelVersion>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM versions ORDER BY version DESC LIMIT 1", VERSION_COLUMNS),
                [],
                version_from_row,
            )
            .optional()?;
        row.map(finish_version).transpose()
    }

    pub fn list_versions(&self) -> StateResponse<Vec<ModelVersion>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM versions ORDER BY version", VERSION_COLUMNS))?;
        let rows = stmt.query_map([], version_from_row)?.collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_version).collect()
    }

    // === Participants ===

    fn finish_participant(&self, (mut participant, eligibility): (Participant, String)) -> StateResponse<Participant> {
        participant.eligibility = eligibility.parse().map_err(StateError::DeserializationError)?;
        Ok(participant)
    }

    /// Upsert a participant and record contact; stale participants become active again
    pub fn touch_participant(&self, id: &str, tier: Option<&str>, now_ms: i64) -> StateResponse<Participant> {
        self.conn.execute(
            "INSERT INTO participants (id, last_seen, eligibility, tier) VALUES (?1, ?2, 'active', ?3) \
             ON CONFLICT(id) DO UPDATE SET \
                 last_seen = MAX(last_seen, excluded.last_seen), \
                 tier = COALESCE(excluded.tier, tier), \
                 eligibility = CASE WHEN eligibility = 'stale' THEN 'active' ELSE eligibility END",
            params![id, now_ms, tier],
        )?;
        self.get_participant(id)?
            .ok_or_else(|| StateError::NotFound(format!("Participant {}", id)))
    }

    pub fn get_participant(&self, id: &str) -> StateResponse<Option<Participant>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, last_seen, eligibility, tier FROM participants WHERE id = ?1",
                params![id],
                participant_from_row,
            )
            .optional()?;
        row.map(|r| self.finish_participant(r)).transpose()
    }

    pub fn list_participants(&self) -> StateResponse<Vec<Participant>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, last_seen, eligibility, tier FROM participants ORDER BY id")?;
        let rows = stmt
            .query_map([], participant_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| self.finish_participant(r)).collect()
    }

    pub fn set_eligibility(&self, id: &str, eligibility: Eligibility, now_ms: i64) -> StateResponse<()> {
        self.conn.execute(
            "INSERT INTO participants (id, last_seen, eligibility, tier) VALUES (?1, ?2, ?3, NULL) \
             ON CONFLICT(id) DO UPDATE SET eligibility = excluded.eligibility",
            params![id, now_ms, eligibility.as_str()],
        )?;
        Ok(())
    }

    /// Mark active participants not seen since `cutoff_ms` as stale
    pub fn mark_stale(&self, cutoff_ms: i64) -> StateResponse<usize> {
        let changed = self.conn.execute(
            "UPDATE participants SET eligibility = 'stale' WHERE eligibility = 'active' AND last_seen < ?1",
            params![cutoff_ms],
        )?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CloseDecision;

    fn store() -> RoundStore {
        RoundStore::open_in_memory().unwrap()
    }

    fn new_round(store: &RoundStore) -> RoundId {
        let round = Round::new(
            1,
            ["edge-a", "edge-b", "edge-c"].map(String::from),
            AggregationPolicy::default(),
            1_000,
        );
        store.create_round(&round).unwrap()
    }

    fn contribution(round_id: RoundId, participant: &str) -> Contribution {
        Contribution::new(round_id, participant, "sha256:aa", "sha256:aa", 1.0, 2_000)
    }

    #[test]
    fn test_round_ids_are_monotonic() {
        let store = store();
        let first = new_round(&store);
        let second = new_round(&store);
        assert!(second > first);

        let round = store.get_round(first).unwrap().unwrap();
        assert_eq!(round.status, RoundStatus::Announced);
        assert_eq!(round.expected.len(), 3);
        assert_eq!(round.deadline, 61_000);
        assert!(round.announced_at.is_none());
    }

    #[test]
    fn test_transition_is_compare_and_swap() {
        let store = store();
        let id = new_round(&store);
        let patch = TransitionPatch::default();

        assert!(
            store
                .transition(id, RoundStatus::Announced, RoundStatus::Collecting, &patch, 5)
                .unwrap()
        );
        // Stale expectation loses
        assert!(
            !store
                .transition(id, RoundStatus::Announced, RoundStatus::Failed, &patch, 6)
                .unwrap()
        );
        assert_eq!(store.get_round(id).unwrap().unwrap().status, RoundStatus::Collecting);
    }

    #[test]
    fn test_transition_rejects_illegal_edges() {
        let store = store();
        let id = new_round(&store);
        let err = store
            .transition(
                id,
                RoundStatus::Aggregated,
                RoundStatus::Collecting,
                &TransitionPatch::default(),
                5,
            )
            .unwrap_err();
        assert!(matches!(err, StateError::IllegalTransition { .. }));
    }

    #[test]
    fn test_transition_patch_written() {
        let store = store();
        let id = new_round(&store);
        store
            .transition(
                id,
                RoundStatus::Announced,
                RoundStatus::Failed,
                &TransitionPatch::failed("operator cancel"),
                9,
            )
            .unwrap();

        let round = store.get_round(id).unwrap().unwrap();
        assert_eq!(round.status, RoundStatus::Failed);
        assert_eq!(round.failure_reason.as_deref(), Some("operator cancel"));
        assert_eq!(round.updated_at, 9);
    }

    #[test]
    fn test_duplicate_contribution_rejected() {
        let mut store = store();
        let id = new_round(&store);

        store.append_contribution(&contribution(id, "edge-a")).unwrap();
        let mut again = contribution(id, "edge-a");
        again.payload_ref = "sha256:bb".into();
        let err = store.append_contribution(&again).unwrap_err();
        assert!(matches!(err, StateError::Duplicate { .. }));

        let stored = store.list_contributions(id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload_ref, "sha256:aa");
        assert!(store.get_round(id).unwrap().unwrap().contributed.contains("edge-a"));
    }

    #[test]
    fn test_contribution_to_closed_round_rejected() {
        let mut store = store();
        let id = new_round(&store);
        store
            .transition(
                id,
                RoundStatus::Announced,
                RoundStatus::Expired,
                &TransitionPatch::default(),
                5,
            )
            .unwrap();

        let err = store.append_contribution(&contribution(id, "edge-a")).unwrap_err();
        assert!(matches!(err, StateError::RoundClosed { .. }));

        let err = store.append_contribution(&contribution(999, "edge-a")).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn test_expire_loses_once_a_contribution_lands() {
        let mut store = store();
        let id = new_round(&store);
        let snapshot = store.get_round(id).unwrap().unwrap();
        assert_eq!(snapshot.closing_decision(61_000), CloseDecision::Expire);

        // Late submission lands between the sweep's read and its CAS
        store.append_contribution(&contribution(id, "edge-a")).unwrap();
        let won = store
            .transition(
                id,
                RoundStatus::Announced,
                RoundStatus::Expired,
                &TransitionPatch::failed("deadline passed with no contributions"),
                61_000,
            )
            .unwrap();
        assert!(!won);

        let round = store.get_round(id).unwrap().unwrap();
        assert_eq!(round.status, RoundStatus::Announced);
        assert!(round.contributed.contains("edge-a"));
        assert_eq!(round.closing_decision(61_000), CloseDecision::Close { partial: true });
    }

    #[test]
    fn test_contributions_sorted_by_participant() {
        let mut store = store();
        let id = new_round(&store);
        for p in ["edge-c", "edge-a", "edge-b"] {
            store.append_contribution(&contribution(id, p)).unwrap();
        }
        let ids: Vec<_> = store
            .list_contributions(id)
            .unwrap()
            .into_iter()
            .map(|c| c.participant_id)
            .collect();
        assert_eq!(ids, vec!["edge-a", "edge-b", "edge-c"]);
    }

    #[test]
    fn test_expired_open_query() {
        let store = store();
        let id = new_round(&store);
        assert!(store.list_expired_open(60_999).unwrap().is_empty());
        let expired = store.list_expired_open(61_000).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
    }

    #[test]
    fn test_mark_announced_once() {
        let store = store();
        let id = new_round(&store);
        assert!(store.mark_announced(id, 10).unwrap());
        assert!(!store.mark_announced(id, 20).unwrap());
        assert_eq!(store.get_round(id).unwrap().unwrap().announced_at, Some(10));
    }

    fn genesis(payload_ref: &str) -> NewVersion {
        NewVersion {
            parent: None,
            payload_ref: payload_ref.into(),
            content_hash: payload_ref.into(),
            round_id: None,
            contributors: vec![],
            created_at: 1,
        }
    }

    #[test]
    fn test_record_genesis_only_once() {
        let mut store = store();
        let first = store.record_genesis(&genesis("sha256:00")).unwrap();
        assert_eq!(first.version, 1);
        assert!(first.is_genesis());

        // A second seed, whatever its bytes, gets the existing row back
        let second = store.record_genesis(&genesis("sha256:ff")).unwrap();
        assert_eq!(second, first);
        assert_eq!(store.list_versions().unwrap().len(), 1);
        assert_eq!(store.latest_version().unwrap().unwrap().payload_ref, "sha256:00");
    }

    #[test]
    fn test_record_genesis_across_connections() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut one = RoundStore::open(temp.path()).unwrap();
        let mut two = RoundStore::open(temp.path()).unwrap();

        let a = one.record_genesis(&genesis("sha256:aa")).unwrap();
        let b = two.record_genesis(&genesis("sha256:bb")).unwrap();
        assert_eq!(a, b);
        assert_eq!(one.list_versions().unwrap().len(), 1);
    }

    fn closing_round(store: &RoundStore) -> RoundId {
        let id = new_round(store);
        store
            .transition(id, RoundStatus::Announced, RoundStatus::Closing, &TransitionPatch::default(), 3)
            .unwrap();
        id
    }

    fn round_version(round_id: RoundId) -> NewVersion {
        NewVersion {
            parent: Some(1),
            payload_ref: "sha256:22".into(),
            content_hash: "sha256:22".into(),
            round_id: Some(round_id),
            contributors: vec!["edge-a".into()],
            created_at: 4,
        }
    }

    #[test]
    fn test_complete_round_is_atomic_and_idempotent() {
        let mut store = store();
        let id = closing_round(&store);

        let first = store.complete_round(id, &round_version(id), 5).unwrap();
        let Completion::Completed(version) = first else {
            panic!("expected completion, got {:?}", first);
        };
        let round = store.get_round(id).unwrap().unwrap();
        assert_eq!(round.status, RoundStatus::Aggregated);
        assert_eq!(round.result_version, Some(version.version));

        let replay = store.complete_round(id, &round_version(id), 6).unwrap();
        assert_eq!(replay, Completion::AlreadyAggregated(version));
        assert_eq!(store.list_versions().unwrap().len(), 1);
    }

    #[test]
    fn test_complete_round_after_cancel_records_nothing() {
        let mut store = store();
        let id = closing_round(&store);
        store
            .transition(id, RoundStatus::Closing, RoundStatus::Failed, &TransitionPatch::failed("cancel"), 4)
            .unwrap();

        let outcome = store.complete_round(id, &round_version(id), 5).unwrap();
        assert_eq!(outcome, Completion::NotClosing(RoundStatus::Failed));
        assert!(store.list_versions().unwrap().is_empty());
    }

    #[test]
    fn test_participant_liveness() {
        let store = store();
        let p = store.touch_participant("edge-a", Some("tier2"), 100).unwrap();
        assert_eq!(p.eligibility, Eligibility::Active);
        assert_eq!(p.tier.as_deref(), Some("tier2"));

        assert_eq!(store.mark_stale(200).unwrap(), 1);
        assert_eq!(
            store.get_participant("edge-a").unwrap().unwrap().eligibility,
            Eligibility::Stale
        );

        // Contact revives a stale participant
        let p = store.touch_participant("edge-a", None, 300).unwrap();
        assert_eq!(p.eligibility, Eligibility::Active);
        assert_eq!(p.tier.as_deref(), Some("tier2"));
        assert_eq!(p.last_seen, 300);
    }

    #[test]
    fn test_suspension_survives_contact() {
        let store = store();
        store.set_eligibility("edge-x", Eligibility::Suspended, 1).unwrap();
        let p = store.touch_participant("edge-x", None, 50).unwrap();
        assert_eq!(p.eligibility, Eligibility::Suspended);
        assert_eq!(store.mark_stale(1_000).unwrap(), 0);
        assert_eq!(store.list_participants().unwrap().len(), 1);
    }

    #[test]
    fn test_open_persists_across_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let id = {
            let store = RoundStore::open(temp.path()).unwrap();
            new_round(&store)
        };
        let store = RoundStore::open(temp.path()).unwrap();
        assert!(store.get_round(id).unwrap().is_some());
    }
}
