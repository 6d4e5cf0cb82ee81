//! Upstream telemetry feed.
//!
//! The feed thread holds a TCP connection to the proxy's telemetry socket and
//! forwards every newline-delimited JSON message to the dashboard. It is
//! steered through `FeedTransport`, which the dashboard owns; `connect` and
//! `disconnect` only post a command and return.

use std::io::{BufRead, BufReader, ErrorKind};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use sqltap_core::{DashboardError, FeedConfig, Transport};
use sqltap_protocol::MAX_REQUEST_BYTES;

use crate::backoff::ReconnectBackoff;
use crate::state::SharedState;

const READ_POLL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    Connect,
    Disconnect,
}

pub struct FeedTransport {
    address: Option<String>,
    commands: Sender<FeedCommand>,
}

impl FeedTransport {
    fn send(&self, command: FeedCommand) -> sqltap_core::Result<()> {
        self.commands
            .send(command)
            .map_err(|_| DashboardError::Transport {
                details: "feed thread is not running".to_string(),
            })
    }
}

impl Transport for FeedTransport {
    fn open(&mut self) -> sqltap_core::Result<()> {
        if self.address.is_none() {
            return Err(DashboardError::Transport {
                details: "no feed address configured".to_string(),
            });
        }
        self.send(FeedCommand::Connect)
    }

    fn close(&mut self) -> sqltap_core::Result<()> {
        if self.address.is_none() {
            return Ok(());
        }
        self.send(FeedCommand::Disconnect)
    }
}

/// Receiving half, handed to the feed thread.
pub struct FeedControl {
    address: Option<String>,
    commands: Receiver<FeedCommand>,
    backoff: ReconnectBackoff,
    auto_connect: bool,
}

pub fn channel(config: &FeedConfig) -> (FeedTransport, FeedControl) {
    let (sender, receiver) = mpsc::channel();
    let address = config
        .address
        .as_ref()
        .map(|address| address.trim().to_string())
        .filter(|address| !address.is_empty());
    (
        FeedTransport {
            address: address.clone(),
            commands: sender,
        },
        FeedControl {
            address,
            commands: receiver,
            backoff: ReconnectBackoff::from_millis(
                config.reconnect_initial_ms,
                config.reconnect_max_ms,
            ),
            auto_connect: config.auto_connect,
        },
    )
}

/// Starts the feed thread. Returns `None` when no address is configured.
pub fn spawn(control: FeedControl, state: Arc<SharedState>) -> Option<thread::JoinHandle<()>> {
    let address = control.address.clone()?;
    Some(thread::spawn(move || run(address, control, state)))
}

enum StreamEnd {
    Closed,
    Disabled,
    ControlGone,
}

fn run(address: String, control: FeedControl, state: Arc<SharedState>) {
    let FeedControl {
        commands,
        mut backoff,
        auto_connect,
        ..
    } = control;
    let mut enabled = auto_connect;

    loop {
        if !enabled {
            match commands.recv() {
                Ok(FeedCommand::Connect) => {
                    info!(address = %address, "Feed enabled");
                    enabled = true;
                    backoff.reset();
                }
                Ok(FeedCommand::Disconnect) => continue,
                Err(_) => return,
            }
        }

        match TcpStream::connect(address.as_str()) {
            Ok(stream) => {
                info!(address = %address, "Connected to telemetry feed");
                backoff.reset();
                state.with_dashboard(|dashboard| dashboard.on_connected());
                let end = read_stream(stream, &commands, &state);
                state.with_dashboard(|dashboard| dashboard.on_disconnected());
                match end {
                    StreamEnd::Closed => {}
                    StreamEnd::Disabled => {
                        info!(address = %address, "Feed disabled");
                        enabled = false;
                        continue;
                    }
                    StreamEnd::ControlGone => return,
                }
            }
            Err(err) => {
                warn!(
                    address = %address,
                    attempt = backoff.attempts() + 1,
                    error = %err,
                    "Failed to connect to telemetry feed"
                );
            }
        }

        let delay = backoff.next_delay();
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting before feed reconnect");
        match commands.recv_timeout(delay) {
            Ok(FeedCommand::Disconnect) => {
                info!(address = %address, "Feed disabled");
                enabled = false;
            }
            Ok(FeedCommand::Connect) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn read_stream(
    stream: TcpStream,
    commands: &Receiver<FeedCommand>,
    state: &SharedState,
) -> StreamEnd {
    if let Err(err) = stream.set_read_timeout(Some(Duration::from_millis(READ_POLL_MS))) {
        warn!(error = %err, "Failed to set feed read timeout");
    }

    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        match commands.try_recv() {
            Ok(FeedCommand::Disconnect) => return StreamEnd::Disabled,
            Ok(FeedCommand::Connect) | Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return StreamEnd::ControlGone,
        }

        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                forward_line(&line, state);
                return StreamEnd::Closed;
            }
            Ok(_) if line.ends_with(b"\n") => {
                forward_line(&line, state);
                line.clear();
            }
            Ok(_) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                warn!(error = %err, "Telemetry feed read failed");
                return StreamEnd::Closed;
            }
        }

        if line.len() > MAX_REQUEST_BYTES {
            warn!(bytes = line.len(), "Dropping oversized telemetry line");
            line.clear();
        }
    }
}

fn forward_line(line: &[u8], state: &SharedState) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    state.with_dashboard(|dashboard| {
        // Rejected messages are logged and counted by the dashboard.
        let _ = dashboard.on_wire_message(text);
    });
}
