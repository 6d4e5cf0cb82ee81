//! Ad-hoc query execution side channel.
//!
//! Execution is independent of the reconciled history: its result is kept as
//! an opaque payload for display and never touches the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ExecutorConfig;
use crate::error::{DashboardError, Result};

pub const DATABASE_ENV: &str = "SQLTAP_DATABASE";
pub const PARAMETERS_ENV: &str = "SQLTAP_PARAMETERS";
const EMPTY_RESPONSE: &str = "Empty response";
const WAIT_POLL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecuteRequest {
    pub database_name: Option<String>,
    pub query_text: String,
    pub parameters: Vec<String>,
}

/// Result of the most recent execution, success or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub request: ExecuteRequest,
    pub executed_at: DateTime<Utc>,
    pub ok: bool,
    /// Result blob on success, error text otherwise.
    pub payload: String,
}

impl ExecutionOutcome {
    pub fn from_result(request: ExecuteRequest, result: Result<String>) -> Self {
        let (ok, payload) = match result {
            Ok(payload) => (true, payload),
            Err(err) => (false, err.to_string()),
        };
        Self {
            request,
            executed_at: Utc::now(),
            ok,
            payload,
        }
    }
}

pub trait QueryExecutor: Send {
    fn execute(&self, request: &ExecuteRequest) -> Result<String>;
}

/// Used when no executor is configured.
#[derive(Debug, Default)]
pub struct DisabledExecutor;

impl QueryExecutor for DisabledExecutor {
    fn execute(&self, _request: &ExecuteRequest) -> Result<String> {
        Err(DashboardError::ExecutorUnavailable)
    }
}

/// Runs an external client program with the query on stdin.
///
/// The database name and parameters are exported as `SQLTAP_DATABASE` and
/// `SQLTAP_PARAMETERS` (a JSON array). Stdout is returned verbatim.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl QueryExecutor for CommandExecutor {
    fn execute(&self, request: &ExecuteRequest) -> Result<String> {
        let parameters = serde_json::to_string(&request.parameters).map_err(|err| {
            DashboardError::ExecutionFailed {
                details: format!("failed to encode parameters: {}", err),
            }
        })?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(PARAMETERS_ENV, parameters)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match &request.database_name {
            Some(database) => command.env(DATABASE_ENV, database),
            None => command.env_remove(DATABASE_ENV),
        };

        let mut child = command.spawn().map_err(|source| DashboardError::Io {
            context: format!("spawning {}", self.program),
            source,
        })?;

        let deadline = Instant::now() + self.timeout;
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);
        if let Some(stdin) = child.stdin.take() {
            spawn_writer(stdin, request.query_text.clone());
        }

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(DashboardError::ExecutionFailed {
                        details: format!("{} timed out after {:?}", self.program, self.timeout),
                    });
                }
                Ok(None) => thread::sleep(Duration::from_millis(WAIT_POLL_MS)),
                Err(source) => {
                    return Err(DashboardError::Io {
                        context: format!("waiting for {}", self.program),
                        source,
                    })
                }
            }
        };

        let stdout = stdout.map(join_reader).unwrap_or_default();
        let stderr = stderr.map(join_reader).unwrap_or_default();

        if !status.success() {
            let details = if stderr.trim().is_empty() {
                format!("{} exited with {}", self.program, status)
            } else {
                stderr.trim().to_string()
            };
            return Err(DashboardError::ExecutionFailed { details });
        }

        if stdout.trim().is_empty() {
            Ok(EMPTY_RESPONSE.to_string())
        } else {
            Ok(stdout)
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

/// Feeds the query on its own thread so a client that never drains stdin
/// cannot outlive the deadline. Write errors surface as the exit status.
fn spawn_writer<W: Write + Send + 'static>(mut writer: W, input: String) {
    thread::spawn(move || {
        let _ = writer.write_all(input.as_bytes());
    });
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

pub fn executor_from_config(config: &ExecutorConfig) -> Box<dyn QueryExecutor> {
    match &config.program {
        Some(program) if !program.trim().is_empty() => Box::new(CommandExecutor::new(
            program.clone(),
            config.args.clone(),
            Duration::from_millis(config.timeout_ms),
        )),
        _ => Box::new(DisabledExecutor),
    }
}
