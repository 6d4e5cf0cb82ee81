//! Error types for sqltap-core operations.
//!
//! Malformed telemetry never reaches this type: the decoder reports it as an
//! `ErrorInfo` and the dashboard drops it. These variants cover lookups,
//! collaborators and configuration.

use std::path::PathBuf;

use sqltap_protocol::{CommandId, ConnectionId};

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    // ─────────────────────────────────────────────────────────────────────
    // Referential Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Query not found: connection {connection_id}, command {command_id}")]
    QueryNotFound {
        connection_id: ConnectionId,
        command_id: CommandId,
    },

    #[error("Query is not executable: connection {connection_id}, command {command_id}")]
    NotExecutable {
        connection_id: ConnectionId,
        command_id: CommandId,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Collaborator Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Query execution is not configured")]
    ExecutorUnavailable,

    #[error("Query execution failed: {details}")]
    ExecutionFailed { details: String },

    #[error("Transport error: {details}")]
    Transport { details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Internal
    // ─────────────────────────────────────────────────────────────────────
    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl DashboardError {
    /// Stable code used when the error crosses the IPC boundary.
    pub fn code(&self) -> &'static str {
        match self {
            DashboardError::QueryNotFound { .. } => "query_not_found",
            DashboardError::NotExecutable { .. } => "not_executable",
            DashboardError::ExecutorUnavailable => "executor_unavailable",
            DashboardError::ExecutionFailed { .. } => "execution_failed",
            DashboardError::Transport { .. } => "transport_error",
            DashboardError::ConfigMalformed { .. } => "config_malformed",
            DashboardError::Io { .. } => "io_error",
            DashboardError::InvariantViolation(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
