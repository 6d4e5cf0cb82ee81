//! IPC protocol types and telemetry event model for sqltap.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests and to decode the proxy feed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod telemetry;

pub use telemetry::{
    decode_event, decode_event_str, CommandId, ConnectionId, ResultStatus, SessionPhase,
    TelemetryEvent,
};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Event,
    GetView,
    SetFilter,
    SelectSession,
    ToggleExpand,
    ToggleExpandAll,
    Clear,
    Connect,
    Disconnect,
    Execute,
    GetQuery,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Params of `set_filter`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FilterParams {
    pub text: String,
    /// Commit without waiting for the debounce window.
    #[serde(default)]
    pub immediate: bool,
}

/// Params addressing one session (`select_session`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionParams {
    pub connection_id: ConnectionId,
}

/// Params addressing one recorded command (`toggle_expand`, `get_query`,
/// and `execute` of a recorded query).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandParams {
    pub connection_id: ConnectionId,
    pub command_id: CommandId,
}

/// Params of an ad-hoc `execute`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AdHocQueryParams {
    #[serde(default)]
    pub database_name: Option<String>,
    pub query_text: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteParams {
    Recorded(CommandParams),
    AdHoc(AdHocQueryParams),
}

pub fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
    method: &str,
) -> Result<T, ErrorInfo> {
    let params = params.ok_or_else(|| {
        ErrorInfo::new("invalid_params", format!("{} requires params", method))
    })?;
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} params are invalid: {}", method, err),
        )
    })
}

pub fn parse_execute_params(params: Option<Value>) -> Result<ExecuteParams, ErrorInfo> {
    let is_recorded = params
        .as_ref()
        .map(|value| value.get("command_id").is_some())
        .unwrap_or(false);

    if is_recorded {
        parse_params(params, "execute").map(ExecuteParams::Recorded)
    } else {
        let parsed: AdHocQueryParams = parse_params(params, "execute")?;
        if parsed.query_text.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_params", "query_text is required"));
        }
        Ok(ExecuteParams::AdHoc(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrips_snake_case_method() {
        let request = Request::new(Method::ToggleExpandAll, None).with_id("req-1");
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["method"], "toggle_expand_all");

        let parsed: Request = serde_json::from_value(value).expect("parse");
        assert_eq!(parsed.method, Method::ToggleExpandAll);
        assert_eq!(parsed.id.as_deref(), Some("req-1"));
    }

    #[test]
    fn rejects_unknown_request_fields() {
        let parsed = serde_json::from_value::<Request>(json!({
            "protocol_version": 1,
            "method": "get_view",
            "extra": true
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn parses_filter_params_with_default_immediate() {
        let params: FilterParams =
            parse_params(Some(json!({"text": "select"})), "set_filter").expect("params");
        assert_eq!(params.text, "select");
        assert!(!params.immediate);
    }

    #[test]
    fn missing_params_is_invalid() {
        let err = parse_params::<SessionParams>(None, "select_session").unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn execute_params_distinguish_recorded_and_adhoc() {
        let recorded =
            parse_execute_params(Some(json!({"connection_id": "1", "command_id": 4})))
                .expect("recorded");
        assert_eq!(
            recorded,
            ExecuteParams::Recorded(CommandParams {
                connection_id: ConnectionId::from("1"),
                command_id: CommandId::new(4),
            })
        );

        let adhoc = parse_execute_params(Some(json!({
            "database_name": "shop",
            "query_text": "SELECT 1"
        })))
        .expect("adhoc");
        assert!(matches!(adhoc, ExecuteParams::AdHoc(ref p) if p.query_text == "SELECT 1"));
    }

    #[test]
    fn execute_requires_query_text() {
        let err = parse_execute_params(Some(json!({"query_text": "  "}))).unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }
}
