//! Authoritative in-memory state: sessions and the queries issued on them.
//!
//! The store folds an unordered, possibly duplicated event stream into one
//! record per `(connection, generation, command)` and one session per
//! `(connection, generation)`. It is the only owner of that state; every
//! other component reads from it.
//!
//! # Reconciliation rules
//!
//! - A repeated `QueryIssued` for a command already recorded in the current
//!   generation is a duplicate and changes nothing.
//! - A `QueryResult` without a matching record is an *orphan*. Orphans wait
//!   in a bounded FIFO buffer and are applied when their issue event arrives;
//!   with a capacity of zero they are dropped.
//! - Session state is last-write-wins, except that `Started` (or a new
//!   command) on a `Finished` session opens the next generation, so a reused
//!   connection id never merges with its earlier history.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use sqltap_protocol::{CommandId, ConnectionId, ResultStatus, SessionPhase};

use crate::error::{DashboardError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Ok,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Ok => "ok",
            QueryStatus::Error => "error",
        }
    }
}

impl From<ResultStatus> for QueryStatus {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Ok => QueryStatus::Ok,
            ResultStatus::Error => QueryStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionKey {
    pub connection_id: ConnectionId,
    pub generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    connection_id: ConnectionId,
    generation: u32,
    command_id: CommandId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRecord {
    pub connection_id: ConnectionId,
    pub generation: u32,
    pub command_id: CommandId,
    pub database_name: Option<String>,
    pub query_text: String,
    pub parameters: Vec<String>,
    pub is_executable: bool,
    pub status: QueryStatus,
    pub error_message: Option<String>,
    pub duration_millis: Option<u64>,
    pub expanded: bool,
    pub received_seq: u64,
}

impl QueryRecord {
    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            connection_id: self.connection_id.clone(),
            generation: self.generation,
        }
    }

    fn key(&self) -> QueryKey {
        QueryKey {
            connection_id: self.connection_id.clone(),
            generation: self.generation,
            command_id: self.command_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub connection_id: ConnectionId,
    pub generation: u32,
    pub state: SessionPhase,
    pub query_count: usize,
    pub first_seen_seq: u64,
    pub last_seen_seq: u64,
}

impl SessionInfo {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            connection_id: self.connection_id.clone(),
            generation: self.generation,
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    info: SessionInfo,
    /// Command ids in the order their records were created.
    commands: Vec<CommandId>,
}

#[derive(Debug, Clone)]
struct OrphanResult {
    connection_id: ConnectionId,
    command_id: CommandId,
    status: ResultStatus,
    error_message: Option<String>,
    duration_millis: u64,
}

/// How an event affected the session it referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Unchanged,
    Created(SessionKey),
    /// A finished connection id came back; this is its new generation.
    Reused(SessionKey),
}

impl SessionChange {
    pub fn new_session(&self) -> Option<&SessionKey> {
        match self {
            SessionChange::Unchanged => None,
            SessionChange::Created(key) | SessionChange::Reused(key) => Some(key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueStatus {
    Inserted,
    /// Inserted, and a buffered orphan result was applied to it.
    InsertedWithBufferedResult,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueOutcome {
    pub status: IssueStatus,
    pub session: SessionChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    Applied,
    Buffered,
    Dropped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub queries_issued: u64,
    pub duplicate_issues: u64,
    pub results_applied: u64,
    pub orphan_results: u64,
    pub orphans_reconciled: u64,
    pub orphans_evicted: u64,
    pub orphans_dropped: u64,
    pub session_reuses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub expand_by_default: bool,
    pub orphan_buffer_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            expand_by_default: true,
            orphan_buffer_capacity: 256,
        }
    }
}

/// A new query as carried by `QueryIssued`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedQuery {
    pub connection_id: ConnectionId,
    pub command_id: CommandId,
    pub database_name: Option<String>,
    pub query_text: String,
    pub parameters: Vec<String>,
    pub is_executable: bool,
}

#[derive(Debug, Default)]
pub struct EntityStore {
    options: StoreOptions,
    /// Sessions in first-seen order, every generation included.
    sessions: Vec<SessionEntry>,
    session_index: HashMap<SessionKey, usize>,
    /// Index of the newest generation per connection.
    latest: HashMap<ConnectionId, usize>,
    queries: HashMap<QueryKey, QueryRecord>,
    orphans: VecDeque<OrphanResult>,
    next_seq: u64,
    stats: StoreStats,
}

impl EntityStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn apply_query_issued(&mut self, query: IssuedQuery) -> Result<IssueOutcome> {
        let seq = self.bump_seq();

        if let Some(&index) = self.latest.get(&query.connection_id) {
            let generation = self.sessions[index].info.generation;
            let key = QueryKey {
                connection_id: query.connection_id.clone(),
                generation,
                command_id: query.command_id,
            };
            if self.queries.contains_key(&key) {
                self.stats.duplicate_issues += 1;
                tracing::debug!(
                    connection_id = %query.connection_id,
                    command_id = %query.command_id,
                    generation,
                    "Duplicate query issue ignored"
                );
                return Ok(IssueOutcome {
                    status: IssueStatus::Duplicate,
                    session: SessionChange::Unchanged,
                });
            }
        }

        let (index, session) = self.session_for_new_query(&query.connection_id, seq);
        let generation = self.sessions[index].info.generation;

        let record = QueryRecord {
            connection_id: query.connection_id,
            generation,
            command_id: query.command_id,
            database_name: query.database_name,
            query_text: query.query_text,
            parameters: query.parameters,
            is_executable: query.is_executable,
            status: QueryStatus::Pending,
            error_message: None,
            duration_millis: None,
            expanded: self.options.expand_by_default,
            received_seq: seq,
        };
        let key = record.key();
        self.insert_record(index, record)?;
        self.stats.queries_issued += 1;

        let status = match self.take_orphan(&key.connection_id, key.command_id) {
            Some(orphan) => {
                if let Some(record) = self.queries.get_mut(&key) {
                    resolve(record, orphan.status, orphan.error_message, orphan.duration_millis);
                }
                self.stats.orphans_reconciled += 1;
                self.stats.results_applied += 1;
                IssueStatus::InsertedWithBufferedResult
            }
            None => IssueStatus::Inserted,
        };

        Ok(IssueOutcome { status, session })
    }

    pub fn apply_query_result(
        &mut self,
        connection_id: &ConnectionId,
        command_id: CommandId,
        status: ResultStatus,
        error_message: Option<String>,
        duration_millis: u64,
    ) -> ResultOutcome {
        let seq = self.bump_seq();

        if let Some(key) = self.result_target(connection_id, command_id) {
            if let Some(record) = self.queries.get_mut(&key) {
                resolve(record, status, error_message, duration_millis);
                self.stats.results_applied += 1;
                self.touch_session(&key.connection_id, key.generation, seq);
                return ResultOutcome::Applied;
            }
        }

        self.stats.orphan_results += 1;
        if self.options.orphan_buffer_capacity == 0 {
            self.stats.orphans_dropped += 1;
            tracing::debug!(
                connection_id = %connection_id,
                command_id = %command_id,
                "Orphan query result dropped"
            );
            return ResultOutcome::Dropped;
        }

        // A repeated orphan for the same command replaces the earlier one.
        let _ = self.take_orphan(connection_id, command_id);
        if self.orphans.len() >= self.options.orphan_buffer_capacity {
            if let Some(evicted) = self.orphans.pop_front() {
                self.stats.orphans_evicted += 1;
                tracing::debug!(
                    connection_id = %evicted.connection_id,
                    command_id = %evicted.command_id,
                    "Orphan buffer full; evicted oldest result"
                );
            }
        }
        self.orphans.push_back(OrphanResult {
            connection_id: connection_id.clone(),
            command_id,
            status,
            error_message,
            duration_millis,
        });
        tracing::debug!(
            connection_id = %connection_id,
            command_id = %command_id,
            buffered = self.orphans.len(),
            "Orphan query result buffered"
        );
        ResultOutcome::Buffered
    }

    pub fn apply_session_state(
        &mut self,
        connection_id: &ConnectionId,
        state: SessionPhase,
    ) -> SessionChange {
        let seq = self.bump_seq();

        match self.latest.get(connection_id).copied() {
            None => {
                let index = self.push_session(connection_id.clone(), 0, state, seq);
                SessionChange::Created(self.sessions[index].info.key())
            }
            Some(index) => {
                let current = &self.sessions[index].info;
                if current.state == SessionPhase::Finished && state == SessionPhase::Started {
                    let generation = current.generation + 1;
                    let index = self.push_session(connection_id.clone(), generation, state, seq);
                    self.stats.session_reuses += 1;
                    SessionChange::Reused(self.sessions[index].info.key())
                } else {
                    let info = &mut self.sessions[index].info;
                    info.state = state;
                    info.last_seen_seq = seq;
                    SessionChange::Unchanged
                }
            }
        }
    }

    /// Drops every session, record and buffered orphan.
    pub fn reset(&mut self) {
        self.sessions.clear();
        self.session_index.clear();
        self.latest.clear();
        self.queries.clear();
        self.orphans.clear();
        self.stats = StoreStats::default();
    }

    /// Flips the presentation flag of the newest record for the pair and
    /// returns its new value.
    pub fn toggle_expanded(
        &mut self,
        connection_id: &ConnectionId,
        command_id: CommandId,
    ) -> Result<bool> {
        let record = self
            .newest_key_for(connection_id, command_id)
            .and_then(|key| self.queries.get_mut(&key))
            .ok_or_else(|| DashboardError::QueryNotFound {
                connection_id: connection_id.clone(),
                command_id,
            })?;
        record.expanded = !record.expanded;
        Ok(record.expanded)
    }

    pub fn set_all_expanded(&mut self, expanded: bool) {
        for record in self.queries.values_mut() {
            record.expanded = expanded;
        }
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionInfo> {
        self.sessions.iter().map(|entry| &entry.info)
    }

    pub fn session(&self, key: &SessionKey) -> Option<&SessionInfo> {
        self.session_index
            .get(key)
            .map(|&index| &self.sessions[index].info)
    }

    pub fn latest_session(&self, connection_id: &ConnectionId) -> Option<&SessionInfo> {
        self.latest
            .get(connection_id)
            .map(|&index| &self.sessions[index].info)
    }

    /// All generations of one connection, oldest first.
    pub fn sessions_for<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
    ) -> impl Iterator<Item = &'a SessionInfo> + 'a {
        self.sessions()
            .filter(move |info| &info.connection_id == connection_id)
    }

    /// Records of one session in the order they were first issued.
    pub fn queries_for(&self, key: &SessionKey) -> Vec<&QueryRecord> {
        let Some(&index) = self.session_index.get(key) else {
            return Vec::new();
        };
        self.sessions[index]
            .commands
            .iter()
            .filter_map(|command_id| {
                self.queries.get(&QueryKey {
                    connection_id: key.connection_id.clone(),
                    generation: key.generation,
                    command_id: *command_id,
                })
            })
            .collect()
    }

    /// The newest record for the pair across generations.
    pub fn query(&self, connection_id: &ConnectionId, command_id: CommandId) -> Option<&QueryRecord> {
        self.newest_key_for(connection_id, command_id)
            .and_then(|key| self.queries.get(&key))
    }

    pub fn total_queries(&self) -> usize {
        self.queries.len()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.queries.is_empty()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn push_session(
        &mut self,
        connection_id: ConnectionId,
        generation: u32,
        state: SessionPhase,
        seq: u64,
    ) -> usize {
        let info = SessionInfo {
            connection_id: connection_id.clone(),
            generation,
            state,
            query_count: 0,
            first_seen_seq: seq,
            last_seen_seq: seq,
        };
        let index = self.sessions.len();
        self.session_index.insert(info.key(), index);
        self.latest.insert(connection_id.clone(), index);
        self.sessions.push(SessionEntry {
            info,
            commands: Vec::new(),
        });
        if generation == 0 {
            tracing::info!(connection_id = %connection_id, state = state.as_str(), "Session created");
        } else {
            tracing::info!(connection_id = %connection_id, generation, "Session id reused; new generation");
        }
        index
    }

    /// Resolves the session a new (non-duplicate) query belongs to, creating
    /// or re-opening it as needed.
    fn session_for_new_query(&mut self, connection_id: &ConnectionId, seq: u64) -> (usize, SessionChange) {
        match self.latest.get(connection_id).copied() {
            None => {
                let index = self.push_session(connection_id.clone(), 0, SessionPhase::Started, seq);
                (index, SessionChange::Created(self.sessions[index].info.key()))
            }
            Some(index) if self.sessions[index].info.state == SessionPhase::Finished => {
                let generation = self.sessions[index].info.generation + 1;
                let index =
                    self.push_session(connection_id.clone(), generation, SessionPhase::Started, seq);
                self.stats.session_reuses += 1;
                (index, SessionChange::Reused(self.sessions[index].info.key()))
            }
            Some(index) => (index, SessionChange::Unchanged),
        }
    }

    fn insert_record(&mut self, index: usize, record: QueryRecord) -> Result<()> {
        let key = record.key();
        if self.queries.contains_key(&key) {
            return Err(DashboardError::InvariantViolation(format!(
                "query record for connection {} command {} generation {} written twice",
                key.connection_id, key.command_id, key.generation
            )));
        }
        let entry = &mut self.sessions[index];
        entry.commands.push(key.command_id);
        entry.info.query_count += 1;
        entry.info.last_seen_seq = record.received_seq;
        self.queries.insert(key, record);
        Ok(())
    }

    fn newest_key_for(&self, connection_id: &ConnectionId, command_id: CommandId) -> Option<QueryKey> {
        let newest = self.latest.get(connection_id)?;
        let newest_generation = self.sessions[*newest].info.generation;
        (0..=newest_generation).rev().find_map(|generation| {
            let key = QueryKey {
                connection_id: connection_id.clone(),
                generation,
                command_id,
            };
            self.queries.contains_key(&key).then_some(key)
        })
    }

    /// The record a result may resolve: the pair in the newest generation,
    /// or a still pending record from an earlier one. A resolved record of a
    /// finished generation is history and is never overwritten.
    fn result_target(&self, connection_id: &ConnectionId, command_id: CommandId) -> Option<QueryKey> {
        let key = self.newest_key_for(connection_id, command_id)?;
        let newest = self.latest.get(connection_id)?;
        if key.generation == self.sessions[*newest].info.generation {
            return Some(key);
        }
        let pending = self
            .queries
            .get(&key)
            .is_some_and(|record| record.status == QueryStatus::Pending);
        pending.then_some(key)
    }

    fn take_orphan(&mut self, connection_id: &ConnectionId, command_id: CommandId) -> Option<OrphanResult> {
        let position = self.orphans.iter().position(|orphan| {
            &orphan.connection_id == connection_id && orphan.command_id == command_id
        })?;
        self.orphans.remove(position)
    }

    fn touch_session(&mut self, connection_id: &ConnectionId, generation: u32, seq: u64) {
        let key = SessionKey {
            connection_id: connection_id.clone(),
            generation,
        };
        if let Some(&index) = self.session_index.get(&key) {
            self.sessions[index].info.last_seen_seq = seq;
        }
    }
}

fn resolve(
    record: &mut QueryRecord,
    status: ResultStatus,
    error_message: Option<String>,
    duration_millis: u64,
) {
    record.status = status.into();
    record.error_message = match status {
        ResultStatus::Error => error_message,
        ResultStatus::Ok => None,
    };
    record.duration_millis = Some(duration_millis);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    fn issued(connection: &str, command: u64, query: &str) -> IssuedQuery {
        IssuedQuery {
            connection_id: conn(connection),
            command_id: CommandId::new(command),
            database_name: None,
            query_text: query.to_string(),
            parameters: Vec::new(),
            is_executable: true,
        }
    }

    fn session_key(connection: &str, generation: u32) -> SessionKey {
        SessionKey {
            connection_id: conn(connection),
            generation,
        }
    }

    #[test]
    fn duplicate_issue_is_idempotent() {
        let mut store = EntityStore::new(StoreOptions::default());

        let first = store.apply_query_issued(issued("1", 1, "SELECT 1")).expect("issue");
        let second = store.apply_query_issued(issued("1", 1, "SELECT 1")).expect("issue");

        assert_eq!(first.status, IssueStatus::Inserted);
        assert_eq!(first.session, SessionChange::Created(session_key("1", 0)));
        assert_eq!(second.status, IssueStatus::Duplicate);
        assert_eq!(store.total_queries(), 1);
        assert_eq!(store.latest_session(&conn("1")).expect("session").query_count, 1);
        assert_eq!(store.stats().duplicate_issues, 1);
    }

    #[test]
    fn issue_creates_started_session() {
        let mut store = EntityStore::new(StoreOptions::default());
        store.apply_query_issued(issued("7", 1, "SELECT 1")).expect("issue");

        let session = store.latest_session(&conn("7")).expect("session");
        assert_eq!(session.state, SessionPhase::Started);
        assert_eq!(session.generation, 0);
    }

    #[test]
    fn result_resolves_pending_record() {
        let mut store = EntityStore::new(StoreOptions::default());
        store.apply_query_issued(issued("1", 1, "SELECT 1")).expect("issue");

        let outcome = store.apply_query_result(&conn("1"), CommandId::new(1), ResultStatus::Ok, None, 5);
        assert_eq!(outcome, ResultOutcome::Applied);

        let record = store.query(&conn("1"), CommandId::new(1)).expect("record");
        assert_eq!(record.status, QueryStatus::Ok);
        assert_eq!(record.duration_millis, Some(5));
        assert_eq!(record.error_message, None);
    }

    #[test]
    fn error_result_keeps_message() {
        let mut store = EntityStore::new(StoreOptions::default());
        store.apply_query_issued(issued("1", 1, "SELEC 1")).expect("issue");
        store.apply_query_result(
            &conn("1"),
            CommandId::new(1),
            ResultStatus::Error,
            Some("syntax error".to_string()),
            2,
        );

        let record = store.query(&conn("1"), CommandId::new(1)).expect("record");
        assert_eq!(record.status, QueryStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("syntax error"));
    }

    #[test]
    fn orphan_result_is_buffered_then_reconciled() {
        let mut store = EntityStore::new(StoreOptions::default());

        let outcome = store.apply_query_result(&conn("1"), CommandId::new(3), ResultStatus::Ok, None, 9);
        assert_eq!(outcome, ResultOutcome::Buffered);
        assert_eq!(store.total_queries(), 0);
        assert!(store.latest_session(&conn("1")).is_none());
        assert_eq!(store.orphan_count(), 1);

        let issue = store.apply_query_issued(issued("1", 3, "SELECT 3")).expect("issue");
        assert_eq!(issue.status, IssueStatus::InsertedWithBufferedResult);

        let record = store.query(&conn("1"), CommandId::new(3)).expect("record");
        assert_eq!(record.status, QueryStatus::Ok);
        assert_eq!(record.duration_millis, Some(9));
        assert_eq!(store.orphan_count(), 0);
        assert_eq!(store.stats().orphans_reconciled, 1);
    }

    #[test]
    fn orphan_result_is_dropped_without_buffer() {
        let mut store = EntityStore::new(StoreOptions {
            expand_by_default: true,
            orphan_buffer_capacity: 0,
        });

        let outcome = store.apply_query_result(&conn("1"), CommandId::new(3), ResultStatus::Ok, None, 9);
        assert_eq!(outcome, ResultOutcome::Dropped);

        let issue = store.apply_query_issued(issued("1", 3, "SELECT 3")).expect("issue");
        assert_eq!(issue.status, IssueStatus::Inserted);
        let record = store.query(&conn("1"), CommandId::new(3)).expect("record");
        assert_eq!(record.status, QueryStatus::Pending);
        assert_eq!(store.stats().orphans_dropped, 1);
    }

    #[test]
    fn full_orphan_buffer_evicts_oldest() {
        let mut store = EntityStore::new(StoreOptions {
            expand_by_default: true,
            orphan_buffer_capacity: 2,
        });

        for command in 1..=3 {
            store.apply_query_result(&conn("1"), CommandId::new(command), ResultStatus::Ok, None, 1);
        }
        assert_eq!(store.orphan_count(), 2);
        assert_eq!(store.stats().orphans_evicted, 1);

        let first = store.apply_query_issued(issued("1", 1, "SELECT 1")).expect("issue");
        assert_eq!(first.status, IssueStatus::Inserted);
        let third = store.apply_query_issued(issued("1", 3, "SELECT 3")).expect("issue");
        assert_eq!(third.status, IssueStatus::InsertedWithBufferedResult);
    }

    #[test]
    fn session_state_is_last_write_wins() {
        let mut store = EntityStore::new(StoreOptions::default());

        let created = store.apply_session_state(&conn("2"), SessionPhase::Finished);
        assert_eq!(created, SessionChange::Created(session_key("2", 0)));
        assert_eq!(
            store.latest_session(&conn("2")).expect("session").state,
            SessionPhase::Finished
        );

        let again = store.apply_session_state(&conn("2"), SessionPhase::Finished);
        assert_eq!(again, SessionChange::Unchanged);
        assert_eq!(store.sessions().count(), 1);
    }

    #[test]
    fn started_after_finished_opens_new_generation() {
        let mut store = EntityStore::new(StoreOptions::default());
        store.apply_session_state(&conn("5"), SessionPhase::Started);
        store.apply_query_issued(issued("5", 1, "SELECT 1")).expect("issue");
        store.apply_session_state(&conn("5"), SessionPhase::Finished);

        let reused = store.apply_session_state(&conn("5"), SessionPhase::Started);
        assert_eq!(reused, SessionChange::Reused(session_key("5", 1)));

        let issue = store.apply_query_issued(issued("5", 1, "SELECT 'again'")).expect("issue");
        assert_eq!(issue.status, IssueStatus::Inserted);

        let old = store.queries_for(&session_key("5", 0));
        let new = store.queries_for(&session_key("5", 1));
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].query_text, "SELECT 1");
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].query_text, "SELECT 'again'");
        assert_eq!(store.stats().session_reuses, 1);
    }

    #[test]
    fn new_command_on_finished_session_opens_new_generation() {
        let mut store = EntityStore::new(StoreOptions::default());
        store.apply_query_issued(issued("5", 1, "SELECT 1")).expect("issue");
        store.apply_session_state(&conn("5"), SessionPhase::Finished);

        let duplicate = store.apply_query_issued(issued("5", 1, "SELECT 1")).expect("issue");
        assert_eq!(duplicate.status, IssueStatus::Duplicate);

        let fresh = store.apply_query_issued(issued("5", 2, "SELECT 2")).expect("issue");
        assert_eq!(fresh.session, SessionChange::Reused(session_key("5", 1)));
        assert_eq!(
            store.latest_session(&conn("5")).expect("session").state,
            SessionPhase::Started
        );
    }

    #[test]
    fn early_result_after_reuse_waits_for_its_own_generation() {
        let mut store = EntityStore::new(StoreOptions::default());
        store.apply_query_issued(issued("5", 1, "SELECT old")).expect("issue");
        store.apply_query_result(&conn("5"), CommandId::new(1), ResultStatus::Ok, None, 5);
        store.apply_session_state(&conn("5"), SessionPhase::Finished);
        store.apply_session_state(&conn("5"), SessionPhase::Started);

        let outcome = store.apply_query_result(
            &conn("5"),
            CommandId::new(1),
            ResultStatus::Error,
            Some("boom".to_string()),
            99,
        );
        assert_eq!(outcome, ResultOutcome::Buffered);

        let issue = store.apply_query_issued(issued("5", 1, "SELECT new")).expect("issue");
        assert_eq!(issue.status, IssueStatus::InsertedWithBufferedResult);

        let old = store.queries_for(&session_key("5", 0));
        assert_eq!(old[0].status, QueryStatus::Ok);
        assert_eq!(old[0].duration_millis, Some(5));
        assert_eq!(old[0].error_message, None);

        let new = store.queries_for(&session_key("5", 1));
        assert_eq!(new[0].status, QueryStatus::Error);
        assert_eq!(new[0].duration_millis, Some(99));
        assert_eq!(new[0].error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn late_result_resolves_pending_record_of_earlier_generation() {
        let mut store = EntityStore::new(StoreOptions::default());
        store.apply_query_issued(issued("5", 1, "SELECT slow")).expect("issue");
        store.apply_session_state(&conn("5"), SessionPhase::Finished);
        store.apply_session_state(&conn("5"), SessionPhase::Started);

        let outcome = store.apply_query_result(&conn("5"), CommandId::new(1), ResultStatus::Ok, None, 40);
        assert_eq!(outcome, ResultOutcome::Applied);

        let old = store.queries_for(&session_key("5", 0));
        assert_eq!(old[0].status, QueryStatus::Ok);
        assert_eq!(store.orphan_count(), 0);
    }

    #[test]
    fn queries_keep_issue_order() {
        let mut store = EntityStore::new(StoreOptions::default());
        for (command, text) in [(3, "c"), (1, "a"), (2, "b")] {
            store.apply_query_issued(issued("1", command, text)).expect("issue");
        }

        let texts: Vec<_> = store
            .queries_for(&session_key("1", 0))
            .iter()
            .map(|record| record.query_text.as_str())
            .collect();
        assert_eq!(texts, vec!["c", "a", "b"]);
    }

    #[test]
    fn toggle_expanded_flips_and_reports_missing() {
        let mut store = EntityStore::new(StoreOptions::default());
        store.apply_query_issued(issued("1", 1, "SELECT 1")).expect("issue");

        assert!(store.query(&conn("1"), CommandId::new(1)).expect("record").expanded);
        assert!(!store.toggle_expanded(&conn("1"), CommandId::new(1)).expect("toggle"));

        let err = store.toggle_expanded(&conn("1"), CommandId::new(2)).unwrap_err();
        assert!(matches!(err, DashboardError::QueryNotFound { .. }));
    }

    #[test]
    fn expand_default_follows_options() {
        let mut store = EntityStore::new(StoreOptions {
            expand_by_default: false,
            orphan_buffer_capacity: 16,
        });
        store.apply_query_issued(issued("1", 1, "SELECT 1")).expect("issue");
        assert!(!store.query(&conn("1"), CommandId::new(1)).expect("record").expanded);

        store.set_all_expanded(true);
        assert!(store.query(&conn("1"), CommandId::new(1)).expect("record").expanded);
    }

    #[test]
    fn reset_empties_everything() {
        let mut store = EntityStore::new(StoreOptions::default());
        store.apply_query_issued(issued("1", 1, "SELECT 1")).expect("issue");
        store.apply_query_result(&conn("2"), CommandId::new(1), ResultStatus::Ok, None, 1);

        store.reset();

        assert!(store.is_empty());
        assert_eq!(store.orphan_count(), 0);
        assert_eq!(store.stats(), &StoreStats::default());

        let issue = store.apply_query_issued(issued("1", 1, "SELECT 1")).expect("issue");
        assert_eq!(issue.status, IssueStatus::Inserted);
    }
}
