//! The single entry point for the transport, the operator and the renderer.
//!
//! Every inbound event and user action maps to one method here. Methods run
//! to completion; the only deferred work is the filter debounce, advanced by
//! `tick`.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use sqltap_protocol::{decode_event, decode_event_str, CommandId, ConnectionId, ErrorInfo, TelemetryEvent};

use crate::config::DashboardConfig;
use crate::error::{DashboardError, Result};
use crate::executor::{DisabledExecutor, ExecuteRequest, ExecutionOutcome, QueryExecutor};
use crate::filter::{filter_groups, FilterIndex};
use crate::store::{
    EntityStore, IssueOutcome, IssueStatus, IssuedQuery, QueryRecord, ResultOutcome, SessionChange,
    SessionInfo, SessionKey, StoreOptions, StoreStats,
};
use crate::tracker::{self, SessionTracker};
use crate::transport::{NullTransport, Transport};

pub const ERROR_INTERNAL: &str = "internal_error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Session(SessionChange),
    Issued(IssueOutcome),
    Result(ResultOutcome),
}

impl EventOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EventOutcome::Session(SessionChange::Unchanged) => "session_updated",
            EventOutcome::Session(SessionChange::Created(_)) => "session_created",
            EventOutcome::Session(SessionChange::Reused(_)) => "session_reused",
            EventOutcome::Issued(issued) => match issued.status {
                IssueStatus::Inserted => "query_inserted",
                IssueStatus::InsertedWithBufferedResult => "query_inserted_with_result",
                IssueStatus::Duplicate => "query_duplicate",
            },
            EventOutcome::Result(ResultOutcome::Applied) => "result_applied",
            EventOutcome::Result(ResultOutcome::Buffered) => "result_buffered",
            EventOutcome::Result(ResultOutcome::Dropped) => "result_dropped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub is_live: bool,
    pub is_selected: bool,
    /// Queries of this session matching the committed filter.
    pub visible_queries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterStatus {
    pub applied: String,
    pub pending: Option<String>,
    /// True while a debounce deadline is armed.
    pub filtering: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub orphans_buffered: usize,
    pub protocol_errors: u64,
    pub unknown_toggles: u64,
    pub filter_recomputations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardView {
    pub connected: bool,
    pub active_connection_id: Option<ConnectionId>,
    pub sessions: Vec<SessionSummary>,
    /// Queries of the active connection, every generation, filtered.
    pub queries: Vec<QueryRecord>,
    pub filter: FilterStatus,
    pub total_queries: usize,
    pub expand_all: bool,
    pub last_execution: Option<ExecutionOutcome>,
    pub stats: DashboardStats,
}

pub struct Dashboard {
    store: EntityStore,
    tracker: SessionTracker,
    filter: FilterIndex,
    executor: Box<dyn QueryExecutor>,
    transport: Box<dyn Transport>,
    connected: bool,
    expand_all: bool,
    last_execution: Option<ExecutionOutcome>,
    protocol_errors: u64,
    unknown_toggles: u64,
}

impl Dashboard {
    pub fn new(config: &DashboardConfig) -> Self {
        Self {
            store: EntityStore::new(StoreOptions {
                expand_by_default: config.expand_by_default,
                orphan_buffer_capacity: config.orphan_buffer_capacity,
            }),
            tracker: SessionTracker::new(config.active_session_policy),
            filter: FilterIndex::new(config.filter_debounce()),
            executor: Box::new(DisabledExecutor),
            transport: Box::new(NullTransport),
            connected: false,
            expand_all: config.expand_by_default,
            last_execution: None,
            protocol_errors: 0,
            unknown_toggles: 0,
        }
    }

    pub fn with_executor(mut self, executor: Box<dyn QueryExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connectivity
    // ─────────────────────────────────────────────────────────────────────

    pub fn on_connected(&mut self) {
        if !self.connected {
            tracing::info!("Telemetry feed connected");
        }
        self.connected = true;
    }

    /// Accumulated state is kept for post-mortem inspection.
    pub fn on_disconnected(&mut self) {
        if self.connected {
            tracing::info!(
                sessions = self.store.sessions().count(),
                queries = self.store.total_queries(),
                "Telemetry feed disconnected; keeping accumulated state"
            );
        }
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn connect(&mut self) -> Result<()> {
        self.transport.open().map_err(|err| {
            tracing::warn!(error = %err, "Failed to open telemetry transport");
            err
        })
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.transport.close().map_err(|err| {
            tracing::warn!(error = %err, "Failed to close telemetry transport");
            err
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────

    pub fn on_event(&mut self, event: TelemetryEvent) -> Result<EventOutcome> {
        tracing::debug!(
            kind = event.kind(),
            connection_id = %event.connection_id(),
            "Applying telemetry event"
        );

        let outcome = match event {
            TelemetryEvent::SessionState {
                connection_id,
                state,
            } => EventOutcome::Session(self.store.apply_session_state(&connection_id, state)),
            TelemetryEvent::QueryIssued {
                connection_id,
                command_id,
                database_name,
                query_text,
                parameters,
                is_executable,
            } => {
                let issued = self.store.apply_query_issued(IssuedQuery {
                    connection_id,
                    command_id,
                    database_name,
                    query_text,
                    parameters,
                    is_executable,
                })?;
                EventOutcome::Issued(issued)
            }
            TelemetryEvent::QueryResult {
                connection_id,
                command_id,
                status,
                error_message,
                duration_millis,
            } => EventOutcome::Result(self.store.apply_query_result(
                &connection_id,
                command_id,
                status,
                error_message,
                duration_millis,
            )),
        };

        let change = match &outcome {
            EventOutcome::Session(change) => Some(change),
            EventOutcome::Issued(issued) => Some(&issued.session),
            EventOutcome::Result(_) => None,
        };
        if let Some(key) = change.and_then(SessionChange::new_session) {
            self.tracker.pick_initial_active(&key.connection_id);
        }

        Ok(outcome)
    }

    /// Decodes and applies one raw message. Undecodable messages are logged,
    /// counted and dropped; the error is returned for callers that reply.
    pub fn on_wire_message(&mut self, raw: &str) -> std::result::Result<EventOutcome, ErrorInfo> {
        let decoded = decode_event_str(raw);
        self.apply_decoded(decoded)
    }

    pub fn on_wire_value(&mut self, value: Value) -> std::result::Result<EventOutcome, ErrorInfo> {
        let decoded = decode_event(value);
        self.apply_decoded(decoded)
    }

    fn apply_decoded(
        &mut self,
        decoded: std::result::Result<TelemetryEvent, ErrorInfo>,
    ) -> std::result::Result<EventOutcome, ErrorInfo> {
        let event = decoded.map_err(|err| {
            self.protocol_errors += 1;
            tracing::warn!(code = %err.code, message = %err.message, "Dropping malformed telemetry");
            err
        })?;

        self.on_event(event).map_err(|err| {
            tracing::error!(error = %err, "Failed to apply telemetry event");
            ErrorInfo::new(ERROR_INTERNAL, err.to_string())
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Filtering
    // ─────────────────────────────────────────────────────────────────────

    pub fn on_filter_text_changed(&mut self, text: impl Into<String>) {
        self.on_filter_text_changed_at(text, Instant::now());
    }

    pub fn on_filter_text_changed_at(&mut self, text: impl Into<String>, now: Instant) {
        self.filter.text_changed(text, now);
    }

    /// Advances the debounce timer. Returns `true` when the filter changed.
    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> bool {
        self.filter.poll(now)
    }

    pub fn flush_filter(&mut self) -> bool {
        self.filter.flush()
    }

    pub fn next_filter_deadline(&self) -> Option<Instant> {
        self.filter.next_deadline()
    }

    pub fn filter_status(&self) -> FilterStatus {
        FilterStatus {
            applied: self.filter.applied().text().to_string(),
            pending: self.filter.pending().map(str::to_string),
            filtering: self.filter.is_filtering(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // User actions
    // ─────────────────────────────────────────────────────────────────────

    pub fn on_clear(&mut self) {
        tracing::info!(
            sessions = self.store.sessions().count(),
            queries = self.store.total_queries(),
            "Clearing dashboard"
        );
        self.store.reset();
        self.tracker.clear();
    }

    pub fn on_select_session(&mut self, connection_id: ConnectionId) {
        self.tracker.set_active(connection_id);
    }

    /// Flips the global expand flag and applies it to every record.
    pub fn on_toggle_expand_all(&mut self) -> bool {
        self.expand_all = !self.expand_all;
        self.store.set_all_expanded(self.expand_all);
        self.expand_all
    }

    /// Returns the record's new flag, or `None` for an unknown pair.
    pub fn on_toggle_expand_one(
        &mut self,
        connection_id: &ConnectionId,
        command_id: CommandId,
    ) -> Option<bool> {
        match self.store.toggle_expanded(connection_id, command_id) {
            Ok(expanded) => Some(expanded),
            Err(err) => {
                self.unknown_toggles += 1;
                tracing::debug!(error = %err, "Ignoring toggle for unknown query");
                None
            }
        }
    }

    pub fn query_text(&self, connection_id: &ConnectionId, command_id: CommandId) -> Option<&str> {
        self.store
            .query(connection_id, command_id)
            .map(|record| record.query_text.as_str())
    }

    /// Re-runs a recorded query through the executor.
    pub fn execute_query(
        &mut self,
        connection_id: &ConnectionId,
        command_id: CommandId,
    ) -> Result<&ExecutionOutcome> {
        let record = self
            .store
            .query(connection_id, command_id)
            .ok_or_else(|| DashboardError::QueryNotFound {
                connection_id: connection_id.clone(),
                command_id,
            })?;
        if !record.is_executable {
            return Err(DashboardError::NotExecutable {
                connection_id: connection_id.clone(),
                command_id,
            });
        }

        let request = ExecuteRequest {
            database_name: record.database_name.clone(),
            query_text: record.query_text.clone(),
            parameters: record.parameters.clone(),
        };
        Ok(self.execute(request))
    }

    /// Runs an ad-hoc query. Failures are kept in the outcome, not raised.
    pub fn execute(&mut self, request: ExecuteRequest) -> &ExecutionOutcome {
        let result = self.executor.execute(&request);
        if let Err(err) = &result {
            tracing::warn!(error = %err, "Query execution failed");
        }
        self.last_execution
            .insert(ExecutionOutcome::from_result(request, result))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn active_connection_id(&self) -> Option<&ConnectionId> {
        self.tracker.active()
    }

    pub fn view(&self) -> DashboardView {
        let groups = filter_groups(&self.store, self.filter.applied());
        let visible: HashMap<&SessionKey, usize> = groups
            .iter()
            .map(|group| (&group.session, group.records.len()))
            .collect();

        let sessions = self
            .store
            .sessions()
            .map(|info| SessionSummary {
                visible_queries: visible.get(&info.key()).copied().unwrap_or(0),
                is_live: tracker::is_active(info),
                is_selected: self.tracker.is_selected(&info.connection_id),
                info: info.clone(),
            })
            .collect();

        let queries = match self.tracker.active() {
            Some(active) => groups
                .iter()
                .filter(|group| &group.session.connection_id == active)
                .flat_map(|group| group.records.iter().cloned())
                .collect(),
            None => Vec::new(),
        };

        DashboardView {
            connected: self.connected,
            active_connection_id: self.tracker.active().cloned(),
            sessions,
            queries,
            filter: self.filter_status(),
            total_queries: self.store.total_queries(),
            expand_all: self.expand_all,
            last_execution: self.last_execution.clone(),
            stats: DashboardStats {
                store: self.store.stats().clone(),
                orphans_buffered: self.store.orphan_count(),
                protocol_errors: self.protocol_errors,
                unknown_toggles: self.unknown_toggles,
                filter_recomputations: self.filter.recomputations(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActiveSessionPolicy;
    use crate::store::{IssueStatus, QueryStatus};
    use serde_json::json;
    use sqltap_protocol::{ResultStatus, SessionPhase};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn dashboard() -> Dashboard {
        Dashboard::new(&DashboardConfig::default())
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    fn issue(connection: &str, command: u64, query: &str) -> TelemetryEvent {
        TelemetryEvent::QueryIssued {
            connection_id: conn(connection),
            command_id: CommandId::new(command),
            database_name: Some("shop".to_string()),
            query_text: query.to_string(),
            parameters: Vec::new(),
            is_executable: true,
        }
    }

    fn result(connection: &str, command: u64, status: ResultStatus, millis: u64) -> TelemetryEvent {
        TelemetryEvent::QueryResult {
            connection_id: conn(connection),
            command_id: CommandId::new(command),
            status,
            error_message: None,
            duration_millis: millis,
        }
    }

    fn state(connection: &str, state: SessionPhase) -> TelemetryEvent {
        TelemetryEvent::SessionState {
            connection_id: conn(connection),
            state,
        }
    }

    struct RecordingExecutor {
        seen: Arc<Mutex<Vec<ExecuteRequest>>>,
    }

    impl QueryExecutor for RecordingExecutor {
        fn execute(&self, request: &ExecuteRequest) -> Result<String> {
            self.seen
                .lock()
                .expect("executor lock")
                .push(request.clone());
            Ok("+---+\n| 1 |\n+---+\n".to_string())
        }
    }

    struct FlakyTransport {
        opened: Arc<Mutex<u32>>,
    }

    impl Transport for FlakyTransport {
        fn open(&mut self) -> Result<()> {
            *self.opened.lock().expect("transport lock") += 1;
            Err(DashboardError::Transport {
                details: "connection refused".to_string(),
            })
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn issue_result_duplicate_scenario() {
        let mut dashboard = dashboard();

        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        let view = dashboard.view();
        assert_eq!(view.active_connection_id, Some(conn("1")));
        assert_eq!(view.queries.len(), 1);
        assert_eq!(view.queries[0].status, QueryStatus::Pending);

        dashboard
            .on_event(result("1", 1, ResultStatus::Ok, 5))
            .expect("result");
        let view = dashboard.view();
        assert_eq!(view.queries[0].status, QueryStatus::Ok);
        assert_eq!(view.queries[0].duration_millis, Some(5));

        let outcome = dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        assert_eq!(outcome.label(), "query_duplicate");
        assert!(matches!(
            outcome,
            EventOutcome::Issued(IssueOutcome {
                status: IssueStatus::Duplicate,
                ..
            })
        ));
        let view = dashboard.view();
        assert_eq!(view.queries.len(), 1);
        assert_eq!(view.sessions[0].info.query_count, 1);
        assert_eq!(view.queries[0].status, QueryStatus::Ok);
    }

    #[test]
    fn filter_debounce_scenario() {
        let mut dashboard = dashboard();
        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        dashboard.on_event(issue("1", 2, "SELECT 10")).expect("issue");
        dashboard.on_event(issue("1", 3, "select 2")).expect("issue");

        let start = Instant::now();
        dashboard.on_filter_text_changed_at("select", start);
        dashboard.on_filter_text_changed_at("select 1", start + Duration::from_millis(100));

        let mid = dashboard.view();
        assert!(mid.filter.filtering);
        assert_eq!(mid.queries.len(), 3, "previous result stays visible while typing");

        dashboard.tick_at(start + Duration::from_millis(700));
        let view = dashboard.view();
        assert!(!view.filter.filtering);
        assert_eq!(view.filter.applied, "select 1");
        assert_eq!(view.stats.filter_recomputations, 1);
        let texts: Vec<_> = view.queries.iter().map(|q| q.query_text.as_str()).collect();
        assert_eq!(texts, vec!["SELECT 1", "SELECT 10"]);
    }

    #[test]
    fn records_added_while_filtering_survive_clearing_filter() {
        let mut dashboard = dashboard();
        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        let before: Vec<_> = dashboard.view().queries;

        dashboard.on_filter_text_changed("update");
        dashboard.flush_filter();
        dashboard.on_event(issue("1", 2, "DELETE FROM t")).expect("issue");
        assert!(dashboard.view().queries.is_empty());

        dashboard.on_filter_text_changed("");
        dashboard.flush_filter();
        let after = dashboard.view().queries;
        assert_eq!(after.len(), 2);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1].query_text, "DELETE FROM t");
    }

    #[test]
    fn first_session_wins_by_default() {
        let mut dashboard = dashboard();
        dashboard
            .on_event(state("1", SessionPhase::Started))
            .expect("state");
        dashboard.on_event(issue("2", 1, "SELECT 1")).expect("issue");

        let view = dashboard.view();
        assert_eq!(view.active_connection_id, Some(conn("1")));
        assert!(view.sessions[0].is_selected);
        assert!(!view.sessions[1].is_selected);
        assert!(view.queries.is_empty());
    }

    #[test]
    fn follow_newest_policy_switches_focus() {
        let config = DashboardConfig {
            active_session_policy: ActiveSessionPolicy::FollowNewest,
            ..DashboardConfig::default()
        };
        let mut dashboard = Dashboard::new(&config);
        dashboard
            .on_event(state("1", SessionPhase::Started))
            .expect("state");
        dashboard.on_event(issue("2", 1, "SELECT 1")).expect("issue");

        assert_eq!(dashboard.active_connection_id(), Some(&conn("2")));
    }

    #[test]
    fn filtered_view_keeps_every_session_listed() {
        let mut dashboard = dashboard();
        dashboard.on_event(issue("1", 1, "SELECT * FROM users")).expect("issue");
        dashboard.on_event(issue("1", 2, "UPDATE orders SET x = 1")).expect("issue");
        dashboard.on_event(issue("2", 1, "DELETE FROM carts")).expect("issue");

        dashboard.on_filter_text_changed("users");
        dashboard.flush_filter();
        let view = dashboard.view();

        assert_eq!(view.sessions.len(), 2);
        assert_eq!(view.sessions[0].visible_queries, 1);
        assert_eq!(view.sessions[1].visible_queries, 0);
        let texts: Vec<_> = view.queries.iter().map(|q| q.query_text.as_str()).collect();
        assert_eq!(texts, vec!["SELECT * FROM users"]);
    }

    #[test]
    fn disconnect_keeps_state() {
        let mut dashboard = dashboard();
        dashboard.on_connected();
        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        dashboard
            .on_event(state("1", SessionPhase::Finished))
            .expect("state");

        dashboard.on_disconnected();
        let view = dashboard.view();
        assert!(!view.connected);
        assert_eq!(view.sessions.len(), 1);
        assert!(!view.sessions[0].is_live);
        assert_eq!(view.total_queries, 1);
    }

    #[test]
    fn result_before_issue_does_not_corrupt_store() {
        let mut dashboard = dashboard();
        dashboard
            .on_event(result("4", 9, ResultStatus::Error, 3))
            .expect("result");

        let view = dashboard.view();
        assert_eq!(view.total_queries, 0);
        assert!(view.sessions.is_empty());
        assert_eq!(view.stats.orphans_buffered, 1);

        dashboard.on_event(issue("4", 9, "SELECT boom")).expect("issue");
        let view = dashboard.view();
        assert_eq!(view.total_queries, 1);
        assert_eq!(view.queries[0].status, QueryStatus::Error);
    }

    #[test]
    fn malformed_wire_messages_are_dropped() {
        let mut dashboard = dashboard();

        assert!(dashboard.on_wire_message("not json").is_err());
        assert!(dashboard.on_wire_value(json!({"kind": "mystery"})).is_err());
        dashboard
            .on_wire_value(json!({"ConnId": 1, "CmdId": 1, "Query": "SELECT 1"}))
            .expect("valid wire query");

        let view = dashboard.view();
        assert_eq!(view.stats.protocol_errors, 2);
        assert_eq!(view.total_queries, 1);
    }

    #[test]
    fn clear_resets_store_and_focus() {
        let mut dashboard = dashboard();
        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        dashboard.on_clear();

        let view = dashboard.view();
        assert!(view.sessions.is_empty());
        assert!(view.active_connection_id.is_none());

        dashboard.on_event(issue("2", 1, "SELECT 1")).expect("issue");
        assert_eq!(dashboard.active_connection_id(), Some(&conn("2")));
    }

    #[test]
    fn select_session_accepts_unseen_id() {
        let mut dashboard = dashboard();
        dashboard.on_select_session(conn("42"));
        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        assert_eq!(dashboard.active_connection_id(), Some(&conn("42")));

        dashboard.on_event(issue("42", 1, "SELECT 42")).expect("issue");
        assert_eq!(dashboard.view().queries[0].query_text, "SELECT 42");
    }

    #[test]
    fn expand_toggles_are_presentation_only() {
        let mut dashboard = dashboard();
        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        dashboard.on_event(issue("1", 2, "SELECT 2")).expect("issue");

        assert!(!dashboard.on_toggle_expand_all());
        assert!(dashboard.view().queries.iter().all(|q| !q.expanded));

        assert_eq!(dashboard.on_toggle_expand_one(&conn("1"), CommandId::new(2)), Some(true));
        assert_eq!(dashboard.on_toggle_expand_one(&conn("1"), CommandId::new(9)), None);

        let view = dashboard.view();
        assert_eq!(view.stats.unknown_toggles, 1);
        assert_eq!(view.total_queries, 2);
        assert!(view.queries[1].expanded);
    }

    #[test]
    fn reused_connection_keeps_generations_apart() {
        let mut dashboard = dashboard();
        dashboard.on_event(issue("1", 1, "SELECT 'first'")).expect("issue");
        dashboard
            .on_event(state("1", SessionPhase::Finished))
            .expect("state");
        dashboard
            .on_event(state("1", SessionPhase::Started))
            .expect("state");
        dashboard.on_event(issue("1", 1, "SELECT 'second'")).expect("issue");

        let view = dashboard.view();
        assert_eq!(view.sessions.len(), 2);
        assert!(!view.sessions[0].is_live);
        assert!(view.sessions[1].is_live);
        assert_eq!(view.sessions[1].info.generation, 1);
        let texts: Vec<_> = view.queries.iter().map(|q| q.query_text.as_str()).collect();
        assert_eq!(texts, vec!["SELECT 'first'", "SELECT 'second'"]);
    }

    #[test]
    fn execute_query_uses_recorded_request() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dashboard = dashboard().with_executor(Box::new(RecordingExecutor {
            seen: Arc::clone(&seen),
        }));
        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");

        let outcome = dashboard
            .execute_query(&conn("1"), CommandId::new(1))
            .expect("execute");
        assert!(outcome.ok);
        assert!(outcome.payload.contains("| 1 |"));

        let seen = seen.lock().expect("executor lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].database_name.as_deref(), Some("shop"));
        assert_eq!(seen[0].query_text, "SELECT 1");
    }

    #[test]
    fn execution_failure_is_kept_out_of_store() {
        let mut dashboard = dashboard();
        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        let before = dashboard.view().queries;

        let outcome = dashboard.execute(ExecuteRequest {
            database_name: None,
            query_text: "SELECT 1".to_string(),
            parameters: Vec::new(),
        });
        assert!(!outcome.ok);

        let view = dashboard.view();
        assert_eq!(view.queries, before);
        assert!(view.last_execution.is_some());
    }

    #[test]
    fn execute_rejects_non_executable_and_unknown() {
        let mut dashboard = dashboard();
        dashboard
            .on_event(TelemetryEvent::QueryIssued {
                connection_id: conn("1"),
                command_id: CommandId::new(1),
                database_name: None,
                query_text: "COM_STMT_CLOSE".to_string(),
                parameters: Vec::new(),
                is_executable: false,
            })
            .expect("issue");

        assert!(matches!(
            dashboard.execute_query(&conn("1"), CommandId::new(1)),
            Err(DashboardError::NotExecutable { .. })
        ));
        assert!(matches!(
            dashboard.execute_query(&conn("1"), CommandId::new(2)),
            Err(DashboardError::QueryNotFound { .. })
        ));
        assert!(dashboard.view().last_execution.is_none());
    }

    #[test]
    fn connect_failure_is_reported_and_state_unchanged() {
        let opened = Arc::new(Mutex::new(0));
        let mut dashboard = dashboard().with_transport(Box::new(FlakyTransport {
            opened: Arc::clone(&opened),
        }));

        assert!(dashboard.connect().is_err());
        assert_eq!(*opened.lock().expect("transport lock"), 1);
        assert!(!dashboard.is_connected());
    }

    #[test]
    fn query_text_supports_copy_action() {
        let mut dashboard = dashboard();
        dashboard.on_event(issue("1", 1, "SELECT 1")).expect("issue");
        assert_eq!(dashboard.query_text(&conn("1"), CommandId::new(1)), Some("SELECT 1"));
        assert_eq!(dashboard.query_text(&conn("1"), CommandId::new(2)), None);
    }
}
