//! Plain-text rendering of daemon snapshots.

use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;

const COLLAPSED_QUERY_WIDTH: usize = 72;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ViewSnapshot {
    pub connected: bool,
    pub active_connection_id: Option<String>,
    pub sessions: Vec<SessionRow>,
    pub queries: Vec<QueryRow>,
    pub filter: FilterRow,
    pub total_queries: usize,
    pub last_execution: Option<ExecutionRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionRow {
    pub connection_id: String,
    pub generation: u32,
    pub query_count: usize,
    pub is_live: bool,
    pub is_selected: bool,
    pub visible_queries: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueryRow {
    pub command_id: u64,
    pub database_name: Option<String>,
    pub query_text: String,
    pub parameters: Vec<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub duration_millis: Option<u64>,
    pub expanded: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FilterRow {
    pub applied: String,
    pub pending: Option<String>,
    pub filtering: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecutionRow {
    pub executed_at: Option<DateTime<Utc>>,
    pub ok: bool,
    pub payload: String,
}

pub fn render_view(view: &ViewSnapshot) -> String {
    let mut out = String::new();

    let link = if view.connected {
        "connected"
    } else {
        "disconnected"
    };
    let _ = writeln!(out, "Feed: {}   Queries: {}", link, view.total_queries);

    if !view.filter.applied.is_empty() || view.filter.filtering {
        let _ = write!(out, "Filter: \"{}\"", view.filter.applied);
        if let Some(pending) = view.filter.pending.as_deref() {
            let _ = write!(out, " (updating to \"{}\")", pending);
        }
        out.push('\n');
    }

    out.push('\n');
    if view.sessions.is_empty() {
        out.push_str("No sessions yet\n");
    } else {
        out.push_str("Sessions\n");
        for session in &view.sessions {
            let marker = if session.is_selected { '>' } else { ' ' };
            let liveness = if session.is_live { "live" } else { "closed" };
            let _ = write!(out, "{} #{}", marker, session.connection_id);
            if session.generation > 0 {
                let _ = write!(out, " (reuse {})", session.generation);
            }
            let _ = writeln!(
                out,
                "  {}  {} queries  {} shown",
                liveness, session.query_count, session.visible_queries
            );
        }
    }

    if let Some(active) = view.active_connection_id.as_deref() {
        let _ = writeln!(out, "\nQueries on #{}", active);
        if view.queries.is_empty() {
            out.push_str("  (none)\n");
        }
        for query in &view.queries {
            render_query(&mut out, query);
        }
    }

    if let Some(execution) = &view.last_execution {
        out.push('\n');
        render_execution(&mut out, execution);
    }

    out
}

fn render_query(out: &mut String, query: &QueryRow) {
    let duration = query
        .duration_millis
        .map(|millis| format!("{} ms", millis))
        .unwrap_or_else(|| "-".to_string());
    let database = query.database_name.as_deref().unwrap_or("-");

    let text = if query.expanded {
        query.query_text.clone()
    } else {
        collapse(&query.query_text, COLLAPSED_QUERY_WIDTH)
    };

    let _ = writeln!(
        out,
        "  {:>5}  {:<7}  {:>8}  {:<12}  {}",
        query.command_id, query.status, duration, database, text
    );

    if !query.expanded {
        return;
    }
    if !query.parameters.is_empty() {
        let _ = writeln!(out, "         params: {}", query.parameters.join(", "));
    }
    if let Some(message) = query.error_message.as_deref() {
        let _ = writeln!(out, "         error: {}", message);
    }
}

fn render_execution(out: &mut String, execution: &ExecutionRow) {
    let when = execution
        .executed_at
        .map(|at| at.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_default();
    let label = if execution.ok {
        "Last execution"
    } else {
        "Last execution failed"
    };
    let _ = writeln!(out, "{} {}", label, when);
    out.push_str(execution.payload.trim_end());
    out.push('\n');
}

/// Single-line form of a query, cut to `width` characters.
pub fn collapse(text: &str, width: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= width {
        return single_line;
    }
    let mut cut: String = single_line.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

pub fn render_health(data: &Value) -> String {
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let version = data
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("?");
    let connected = data
        .get("connected")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let total = data
        .get("total_queries")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    format!(
        "daemon {} (v{}), feed {}, {} queries",
        status,
        version,
        if connected { "connected" } else { "disconnected" },
        total
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> ViewSnapshot {
        serde_json::from_value(value).expect("view snapshot")
    }

    #[test]
    fn renders_sessions_and_active_queries() {
        let view = snapshot(json!({
            "connected": true,
            "active_connection_id": "1",
            "total_queries": 2,
            "sessions": [
                {"connection_id": "1", "generation": 0, "state": "started", "query_count": 2,
                 "is_live": true, "is_selected": true, "visible_queries": 2},
                {"connection_id": "2", "generation": 1, "state": "finished", "query_count": 0,
                 "is_live": false, "is_selected": false, "visible_queries": 0}
            ],
            "queries": [
                {"connection_id": "1", "command_id": 1, "query_text": "SELECT 1",
                 "status": "ok", "duration_millis": 5, "expanded": false},
                {"connection_id": "1", "command_id": 2, "query_text": "SELECT ?",
                 "parameters": ["42"], "status": "pending", "expanded": true}
            ],
            "filter": {"applied": "", "pending": null, "filtering": false}
        }));

        let text = render_view(&view);
        assert!(text.starts_with("Feed: connected   Queries: 2"));
        assert!(text.contains("> #1  live  2 queries"));
        assert!(text.contains("  #2 (reuse 1)  closed"));
        assert!(text.contains("5 ms"));
        assert!(text.contains("params: 42"));
        assert!(!text.contains("Filter:"));
    }

    #[test]
    fn renders_pending_filter_and_failed_execution() {
        let view = snapshot(json!({
            "filter": {"applied": "select", "pending": "select 1", "filtering": true},
            "last_execution": {"executed_at": "2024-01-01T00:00:00Z", "ok": false,
                               "payload": "Query execution is not configured"}
        }));

        let text = render_view(&view);
        assert!(text.contains("Filter: \"select\" (updating to \"select 1\")"));
        assert!(text.contains("No sessions yet"));
        assert!(text.contains("Last execution failed"));
        assert!(text.contains("Query execution is not configured"));
    }

    #[test]
    fn collapse_joins_lines_and_truncates() {
        assert_eq!(collapse("SELECT *\n  FROM t", 80), "SELECT * FROM t");
        assert_eq!(collapse("abcdefghij", 8), "abcde...");
    }

    #[test]
    fn health_line_summarizes_daemon() {
        let line = render_health(&json!({
            "status": "ok", "version": "0.1.0", "connected": false, "total_queries": 3
        }));
        assert_eq!(line, "daemon ok (v0.1.0), feed disconnected, 3 queries");
    }
}
