//! Typed telemetry events observed from the database proxy.
//!
//! Two encodings are accepted at the boundary:
//!
//! - **Tagged**: `{"kind": "query_issued", "connection_id": "7", ...}`. This is
//!   what sqltap clients emit and what the IPC `event` method documents.
//! - **Proxy wire**: the untagged objects the proxy pushes over its telemetry
//!   socket, discriminated by which key is present (`Query`, `Result`, `State`).
//!
//! Both decode into [`TelemetryEvent`]. Anything else is rejected with an
//! [`ErrorInfo`] so the caller can log and drop it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::ErrorInfo;

/// Proxy wire byte for a session that has started.
pub const WIRE_STATE_STARTED: u8 = 0xf4;
/// Proxy wire byte for a session that has finished.
pub const WIRE_STATE_FINISHED: u8 = 0xf5;
/// Proxy wire byte marking a failed command; every other value means success.
pub const WIRE_RESULT_ERROR: u8 = 0xff;

pub const ERROR_INVALID_EVENT: &str = "invalid_event";
pub const ERROR_UNKNOWN_EVENT_KIND: &str = "unknown_event_kind";
pub const ERROR_INVALID_FIELD: &str = "invalid_field";

const KNOWN_KINDS: [&str; 3] = ["session_state", "query_issued", "query_result"];

/// Upstream-assigned identifier of a proxied database connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn trimmed(self) -> Self {
        Self(self.0.trim().to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of one command, unique only within its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CommandId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Started,
    Finished,
}

impl SessionPhase {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            WIRE_STATE_STARTED => Some(SessionPhase::Started),
            WIRE_STATE_FINISHED => Some(SessionPhase::Finished),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Started => "started",
            SessionPhase::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    Error,
}

impl ResultStatus {
    pub fn from_wire(value: u8) -> Self {
        if value == WIRE_RESULT_ERROR {
            ResultStatus::Error
        } else {
            ResultStatus::Ok
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    SessionState {
        connection_id: ConnectionId,
        state: SessionPhase,
    },
    QueryIssued {
        connection_id: ConnectionId,
        command_id: CommandId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database_name: Option<String>,
        query_text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        parameters: Vec<String>,
        #[serde(default)]
        is_executable: bool,
    },
    QueryResult {
        connection_id: ConnectionId,
        command_id: CommandId,
        status: ResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        duration_millis: u64,
    },
}

impl TelemetryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::SessionState { .. } => "session_state",
            TelemetryEvent::QueryIssued { .. } => "query_issued",
            TelemetryEvent::QueryResult { .. } => "query_result",
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            TelemetryEvent::SessionState { connection_id, .. }
            | TelemetryEvent::QueryIssued { connection_id, .. }
            | TelemetryEvent::QueryResult { connection_id, .. } => connection_id,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.connection_id().as_str().trim().is_empty() {
            return Err(ErrorInfo::new(
                ERROR_INVALID_FIELD,
                "connection_id is required",
            ));
        }
        if let TelemetryEvent::QueryIssued { query_text, .. } = self {
            if query_text.trim().is_empty() {
                return Err(ErrorInfo::new(ERROR_INVALID_FIELD, "query_text is required"));
            }
        }
        Ok(())
    }

    /// Connection ids are trimmed, blank optional strings become `None`, and
    /// an error message only survives on failed results.
    fn normalized(self) -> Self {
        match self {
            TelemetryEvent::SessionState {
                connection_id,
                state,
            } => TelemetryEvent::SessionState {
                connection_id: connection_id.trimmed(),
                state,
            },
            TelemetryEvent::QueryIssued {
                connection_id,
                command_id,
                database_name,
                query_text,
                parameters,
                is_executable,
            } => TelemetryEvent::QueryIssued {
                connection_id: connection_id.trimmed(),
                command_id,
                database_name: non_blank(database_name),
                query_text,
                parameters,
                is_executable,
            },
            TelemetryEvent::QueryResult {
                connection_id,
                command_id,
                status,
                error_message,
                duration_millis,
            } => {
                let error_message = match status {
                    ResultStatus::Error => non_blank(error_message),
                    ResultStatus::Ok => None,
                };
                TelemetryEvent::QueryResult {
                    connection_id: connection_id.trimmed(),
                    command_id,
                    status,
                    error_message,
                    duration_millis,
                }
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|candidate| !candidate.trim().is_empty())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

impl From<WireId> for ConnectionId {
    fn from(value: WireId) -> Self {
        match value {
            WireId::Number(number) => ConnectionId::from(number),
            WireId::Text(text) => ConnectionId::new(text.trim()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Seconds(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireQuery {
    conn_id: WireId,
    cmd_id: u64,
    #[serde(default)]
    database: Option<String>,
    query: String,
    #[serde(default)]
    parameters: Option<Vec<String>>,
    #[serde(default)]
    executable: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireResult {
    conn_id: WireId,
    cmd_id: u64,
    result: u8,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    duration: Option<WireDuration>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireState {
    conn_id: WireId,
    state: u8,
}

/// Decodes one event in either accepted encoding.
pub fn decode_event(value: Value) -> Result<TelemetryEvent, ErrorInfo> {
    let object = value
        .as_object()
        .ok_or_else(|| ErrorInfo::new(ERROR_INVALID_EVENT, "event must be a JSON object"))?;

    let event = if let Some(kind) = object.get("kind") {
        let kind = kind.as_str().unwrap_or_default().to_string();
        if !KNOWN_KINDS.contains(&kind.as_str()) {
            return Err(ErrorInfo::new(
                ERROR_UNKNOWN_EVENT_KIND,
                format!("unknown event kind '{}'", kind),
            ));
        }
        serde_json::from_value::<TelemetryEvent>(value).map_err(|err| {
            ErrorInfo::new(ERROR_INVALID_EVENT, format!("malformed {} event: {}", kind, err))
        })?
    } else {
        decode_wire_object(object)?
    };

    event.validate()?;
    Ok(event.normalized())
}

pub fn decode_event_str(raw: &str) -> Result<TelemetryEvent, ErrorInfo> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|err| {
        ErrorInfo::new(
            ERROR_INVALID_EVENT,
            format!("event was not valid JSON: {}", err),
        )
    })?;
    decode_event(value)
}

fn decode_wire_object(object: &Map<String, Value>) -> Result<TelemetryEvent, ErrorInfo> {
    let value = Value::Object(object.clone());

    if object.contains_key("Query") {
        let wire: WireQuery = from_wire(value, "query")?;
        return Ok(TelemetryEvent::QueryIssued {
            connection_id: wire.conn_id.into(),
            command_id: CommandId::new(wire.cmd_id),
            database_name: wire.database,
            query_text: wire.query,
            parameters: wire.parameters.unwrap_or_default(),
            is_executable: wire.executable,
        });
    }

    if object.contains_key("Result") {
        let wire: WireResult = from_wire(value, "result")?;
        let duration_millis = match wire.duration {
            Some(duration) => duration_to_millis(duration)?,
            None => 0,
        };
        return Ok(TelemetryEvent::QueryResult {
            connection_id: wire.conn_id.into(),
            command_id: CommandId::new(wire.cmd_id),
            status: ResultStatus::from_wire(wire.result),
            error_message: wire.error,
            duration_millis,
        });
    }

    if object.contains_key("State") {
        let wire: WireState = from_wire(value, "state")?;
        let state = SessionPhase::from_wire(wire.state).ok_or_else(|| {
            ErrorInfo::new(
                ERROR_INVALID_FIELD,
                format!("unknown session state byte 0x{:02x}", wire.state),
            )
        })?;
        return Ok(TelemetryEvent::SessionState {
            connection_id: wire.conn_id.into(),
            state,
        });
    }

    Err(ErrorInfo::new(
        ERROR_UNKNOWN_EVENT_KIND,
        "event has neither a kind nor a Query/Result/State field",
    ))
}

fn from_wire<T: DeserializeOwned>(value: Value, label: &str) -> Result<T, ErrorInfo> {
    serde_json::from_value(value).map_err(|err| {
        ErrorInfo::new(
            ERROR_INVALID_EVENT,
            format!("malformed proxy {} message: {}", label, err),
        )
    })
}

/// The proxy reports durations in seconds, usually as a `"%.2f"` string.
fn duration_to_millis(duration: WireDuration) -> Result<u64, ErrorInfo> {
    let seconds = match duration {
        WireDuration::Seconds(seconds) => seconds,
        WireDuration::Text(text) => text.trim().parse::<f64>().map_err(|_| {
            ErrorInfo::new(
                ERROR_INVALID_FIELD,
                format!("duration '{}' is not a number of seconds", text),
            )
        })?,
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ErrorInfo::new(
            ERROR_INVALID_FIELD,
            "duration must be a non-negative number of seconds",
        ));
    }

    Ok((seconds * 1000.0).round() as u64)
}
