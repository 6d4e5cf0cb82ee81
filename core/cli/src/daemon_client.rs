//! Client helper for talking to the sqltap daemon.
//!
//! One request per connection. A request whose connection could not be
//! opened is retried once with the same id.

use chrono::Utc;
use rand::RngCore;
use serde_json::Value;
use sqltap_protocol::{Method, Request, Response, MAX_REQUEST_BYTES};
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

pub const SOCKET_ENV: &str = "SQLTAP_DAEMON_SOCKET";
const SOCKET_DIR: &str = ".sqltap";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 2_000;
const EXECUTE_READ_TIMEOUT_MS: u64 = 60_000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Home directory not found")]
    NoHome,

    #[error("Failed to connect to daemon socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write request: {0}")]
    Write(String),

    #[error("Failed to read response: {0}")]
    Read(String),

    #[error("Timed out waiting for daemon response")]
    Timeout,

    #[error("Failed to parse response JSON: {0}")]
    Parse(String),

    #[error("{code}: {message}")]
    Daemon { code: String, message: String },
}

impl ClientError {
    pub fn is_connect(&self) -> bool {
        matches!(self, ClientError::Connect { .. })
    }
}

pub fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or(ClientError::NoHome)?;
    Ok(home.join(SOCKET_DIR).join(SOCKET_NAME))
}

/// Sends `method` and returns the response data, turning daemon errors into
/// `ClientError::Daemon`.
pub fn call(method: Method, params: Option<Value>) -> Result<Value, ClientError> {
    let request = Request::new(method, params).with_id(make_request_id());
    let response = send_with_retry(&request)?;
    into_data(response)
}

fn into_data(response: Response) -> Result<Value, ClientError> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    Err(match response.error {
        Some(err) => ClientError::Daemon {
            code: err.code,
            message: err.message,
        },
        None => ClientError::Daemon {
            code: "unknown".to_string(),
            message: "Unknown daemon error".to_string(),
        },
    })
}

fn send_with_retry(request: &Request) -> Result<Response, ClientError> {
    match send_request(request) {
        Err(err) if err.is_connect() => {
            tracing::warn!(error = %err, method = ?request.method, "Daemon unreachable; retrying");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(request).map_err(|retry_err| {
                tracing::warn!(error = %retry_err, method = ?request.method, "Retry failed");
                retry_err
            })
        }
        other => other,
    }
}

fn send_request(request: &Request) -> Result<Response, ClientError> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket).map_err(|source| ClientError::Connect {
        path: socket.clone(),
        source,
    })?;
    let _ = stream.set_read_timeout(Some(read_timeout(request.method)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, request)
        .map_err(|err| ClientError::Write(err.to_string()))?;
    stream
        .write_all(b"\n")
        .map_err(|err| ClientError::Write(err.to_string()))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_timeout(method: Method) -> Duration {
    match method {
        Method::Execute => Duration::from_millis(EXECUTE_READ_TIMEOUT_MS),
        _ => Duration::from_millis(READ_TIMEOUT_MS),
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES * 16 {
                    return Err(ClientError::Read("response exceeded maximum size".to_string()));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ClientError::Timeout);
            }
            Err(err) => return Err(ClientError::Read(err.to_string())),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::Read("daemon response was empty".to_string()));
    }

    serde_json::from_slice(response_bytes).map_err(|err| ClientError::Parse(err.to_string()))
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "req-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        random.next_u64()
    )
}
