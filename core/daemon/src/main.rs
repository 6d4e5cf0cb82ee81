//! sqltap daemon entrypoint.
//!
//! A small, single-writer service that owns the dashboard: a socket listener
//! with strict request validation, the upstream telemetry feed, and a ticker
//! that commits debounced filter text.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serde::Serialize;
use serde_json::Value;
use sqltap_core::config::sqltap_dir;
use sqltap_core::{
    executor_from_config, load_config, DaemonConfig, Dashboard, DashboardError, ExecuteRequest,
    SqltapConfig,
};
use sqltap_protocol::{
    parse_execute_params, parse_params, CommandParams, ErrorInfo, ExecuteParams, FilterParams,
    Method, Request, Response, SessionParams, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod backoff;
mod feed;
mod state;

use state::SharedState;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            SqltapConfig::default()
        }
    };

    let socket_path = match daemon_socket_path(&config.daemon) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let (transport, feed_control) = feed::channel(&config.feed);
    let dashboard = Dashboard::new(&config.dashboard)
        .with_executor(executor_from_config(&config.executor))
        .with_transport(Box::new(transport));
    let shared_state = Arc::new(SharedState::new(dashboard));

    if feed::spawn(feed_control, Arc::clone(&shared_state)).is_none() {
        info!("No feed address configured; accepting events over IPC only");
    }
    spawn_ticker(
        Arc::clone(&shared_state),
        Duration::from_millis(config.daemon.tick_interval_ms.max(1)),
    );

    info!(
        path = %socket_path.display(),
        feed = ?config.feed.address,
        policy = ?config.dashboard.active_session_policy,
        debounce_ms = config.dashboard.filter_debounce_ms,
        "sqltap daemon started"
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn spawn_ticker(state: Arc<SharedState>, interval: Duration) {
    thread::spawn(move || loop {
        thread::sleep(interval);
        if state.with_dashboard(|dashboard| dashboard.tick()) {
            tracing::debug!("Debounced filter committed");
        }
    });
}

fn init_logging() {
    let debug_enabled = env::var("SQLTAP_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path(config: &DaemonConfig) -> Result<PathBuf, String> {
    if let Some(path) = &config.socket_path {
        return expand_home(path);
    }
    let dir = sqltap_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(dir.join(SOCKET_NAME))
}

fn expand_home(path: &Path) -> Result<PathBuf, String> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let params = request.params;

    match request.method {
        Method::GetHealth => {
            let (connected, total_queries) = state.with_dashboard(|dashboard| {
                (dashboard.is_connected(), dashboard.store().total_queries())
            });
            Response::ok(
                id,
                serde_json::json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                    "started_at": state.started_at().to_rfc3339(),
                    "connected": connected,
                    "total_queries": total_queries,
                }),
            )
        }
        Method::Event => handle_event(id, params, state),
        Method::GetView => {
            let view = state.with_dashboard(|dashboard| dashboard.view());
            tracing::debug!(
                sessions = view.sessions.len(),
                queries = view.queries.len(),
                "View snapshot"
            );
            serialize_response(id, &view, "view")
        }
        Method::SetFilter => {
            let parsed: FilterParams = match parse_params(params, "set_filter") {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            let status = state.with_dashboard(|dashboard| {
                dashboard.on_filter_text_changed(parsed.text);
                if parsed.immediate {
                    dashboard.flush_filter();
                }
                dashboard.filter_status()
            });
            serialize_response(id, &status, "filter status")
        }
        Method::SelectSession => {
            let parsed: SessionParams = match parse_params(params, "select_session") {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            info!(connection_id = %parsed.connection_id, "Session selected");
            state.with_dashboard(|dashboard| {
                dashboard.on_select_session(parsed.connection_id.clone())
            });
            Response::ok(
                id,
                serde_json::json!({ "active_connection_id": parsed.connection_id }),
            )
        }
        Method::ToggleExpand => {
            let parsed: CommandParams = match parse_params(params, "toggle_expand") {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            let expanded = state.with_dashboard(|dashboard| {
                dashboard.on_toggle_expand_one(&parsed.connection_id, parsed.command_id)
            });
            match expanded {
                Some(expanded) => Response::ok(id, serde_json::json!({ "expanded": expanded })),
                None => Response::error(
                    id,
                    "query_not_found",
                    format!(
                        "no query {} on connection {}",
                        parsed.command_id, parsed.connection_id
                    ),
                ),
            }
        }
        Method::ToggleExpandAll => {
            let expand_all = state.with_dashboard(|dashboard| dashboard.on_toggle_expand_all());
            Response::ok(id, serde_json::json!({ "expand_all": expand_all }))
        }
        Method::Clear => {
            state.with_dashboard(|dashboard| dashboard.on_clear());
            Response::ok(id, serde_json::json!({ "cleared": true }))
        }
        Method::Connect => match state.with_dashboard(|dashboard| dashboard.connect()) {
            Ok(()) => Response::ok(id, serde_json::json!({ "connecting": true })),
            Err(err) => dashboard_error(id, err),
        },
        Method::Disconnect => match state.with_dashboard(|dashboard| dashboard.disconnect()) {
            Ok(()) => Response::ok(id, serde_json::json!({ "disconnecting": true })),
            Err(err) => dashboard_error(id, err),
        },
        Method::Execute => handle_execute(id, params, state),
        Method::GetQuery => {
            let parsed: CommandParams = match parse_params(params, "get_query") {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            let text = state.with_dashboard(|dashboard| {
                dashboard
                    .query_text(&parsed.connection_id, parsed.command_id)
                    .map(str::to_string)
            });
            match text {
                Some(text) => Response::ok(
                    id,
                    serde_json::json!({
                        "connection_id": parsed.connection_id,
                        "command_id": parsed.command_id,
                        "query_text": text,
                    }),
                ),
                None => dashboard_error(
                    id,
                    DashboardError::QueryNotFound {
                        connection_id: parsed.connection_id,
                        command_id: parsed.command_id,
                    },
                ),
            }
        }
    }
}

fn handle_event(id: Option<String>, params: Option<Value>, state: &SharedState) -> Response {
    let params = match params {
        Some(params) => params,
        None => return Response::error(id, "invalid_params", "event payload is required"),
    };

    match state.with_dashboard(|dashboard| dashboard.on_wire_value(params)) {
        Ok(outcome) => {
            tracing::debug!(outcome = outcome.label(), "Event applied");
            Response::ok(
                id,
                serde_json::json!({ "accepted": true, "outcome": outcome.label() }),
            )
        }
        Err(err) => Response::error_with_info(id, err),
    }
}

fn handle_execute(id: Option<String>, params: Option<Value>, state: &SharedState) -> Response {
    let parsed = match parse_execute_params(params) {
        Ok(parsed) => parsed,
        Err(err) => return Response::error_with_info(id, err),
    };

    // The executor runs under the dashboard lock; its own timeout bounds how
    // long other requests wait.
    let outcome = state.with_dashboard(|dashboard| match parsed {
        ExecuteParams::Recorded(params) => dashboard
            .execute_query(&params.connection_id, params.command_id)
            .cloned(),
        ExecuteParams::AdHoc(params) => Ok(dashboard
            .execute(ExecuteRequest {
                database_name: params.database_name,
                query_text: params.query_text,
                parameters: params.parameters,
            })
            .clone()),
    });

    match outcome {
        Ok(outcome) => serialize_response(id, &outcome, "execution outcome"),
        Err(err) => dashboard_error(id, err),
    }
}

fn dashboard_error(id: Option<String>, err: DashboardError) -> Response {
    warn!(code = err.code(), error = %err, "Request failed");
    Response::error(id, err.code(), err.to_string())
}

fn serialize_response<T: Serialize>(id: Option<String>, value: &T, what: &str) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
