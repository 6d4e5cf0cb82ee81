//! sqltap: operator CLI for the sqltap dashboard daemon.
//!
//! Every subcommand is one request to the daemon, which owns all state.
//!
//! ## Subcommands
//!
//! - `status`, `view`: read the daemon's health and dashboard view
//! - `filter`, `select`, `toggle`, `expand-all`, `clear`: user actions
//! - `connect`, `disconnect`: steer the upstream telemetry feed
//! - `execute`, `run`: re-run a recorded query or an ad-hoc one
//! - `copy`: print a recorded query's text
//! - `send`: pipe raw telemetry messages (one JSON object per line)

mod daemon_client;
mod logging;
mod render;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use sqltap_protocol::Method;
use std::io::{self, BufRead};

use daemon_client::{call, ClientError};

#[derive(Parser)]
#[command(name = "sqltap")]
#[command(about = "Live view of database proxy telemetry")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon health
    Status,

    /// Show sessions and the active session's queries
    View {
        /// Print the raw JSON view
        #[arg(long)]
        json: bool,
    },

    /// Set the filter text (debounced unless --now)
    Filter {
        /// Case-insensitive substring; empty clears the filter
        #[arg(value_name = "TEXT", default_value = "")]
        text: String,

        /// Apply immediately instead of waiting for the debounce window
        #[arg(long)]
        now: bool,
    },

    /// Focus a session by connection id
    Select {
        #[arg(value_name = "CONNECTION_ID")]
        connection_id: String,
    },

    /// Expand or collapse one query
    Toggle {
        #[arg(value_name = "CONNECTION_ID")]
        connection_id: String,
        #[arg(value_name = "COMMAND_ID")]
        command_id: u64,
    },

    /// Expand or collapse every query
    ExpandAll,

    /// Drop all sessions and queries
    Clear,

    /// Enable the upstream telemetry feed
    Connect,

    /// Disable the upstream telemetry feed (state is kept)
    Disconnect,

    /// Re-run a recorded query through the configured executor
    Execute {
        #[arg(value_name = "CONNECTION_ID")]
        connection_id: String,
        #[arg(value_name = "COMMAND_ID")]
        command_id: u64,
    },

    /// Run an ad-hoc query through the configured executor
    Run {
        #[arg(value_name = "QUERY")]
        query: String,

        #[arg(long, short)]
        database: Option<String>,

        /// Positional parameter (repeatable)
        #[arg(long = "param", short)]
        params: Vec<String>,
    },

    /// Print a recorded query's text
    Copy {
        #[arg(value_name = "CONNECTION_ID")]
        connection_id: String,
        #[arg(value_name = "COMMAND_ID")]
        command_id: u64,
    },

    /// Send telemetry messages read from stdin, one JSON object per line
    Send,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli.command) {
        tracing::error!(error = %err, "sqltap command failed");
        eprintln!("sqltap: {}", err);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), ClientError> {
    match command {
        Commands::Status => {
            let data = call(Method::GetHealth, None)?;
            println!("{}", render::render_health(&data));
        }
        Commands::View { json } => {
            let data = call(Method::GetView, None)?;
            if json {
                print_json(&data);
            } else {
                let view: render::ViewSnapshot = serde_json::from_value(data)
                    .map_err(|err| ClientError::Parse(err.to_string()))?;
                print!("{}", render::render_view(&view));
            }
        }
        Commands::Filter { text, now } => {
            let data = call(
                Method::SetFilter,
                Some(json!({ "text": text, "immediate": now })),
            )?;
            match data.get("pending").and_then(Value::as_str) {
                Some(pending) => println!("filter \"{}\" pending", pending),
                None => println!(
                    "filter \"{}\" applied",
                    data.get("applied").and_then(Value::as_str).unwrap_or_default()
                ),
            }
        }
        Commands::Select { connection_id } => {
            call(
                Method::SelectSession,
                Some(json!({ "connection_id": connection_id })),
            )?;
            println!("selected #{}", connection_id);
        }
        Commands::Toggle {
            connection_id,
            command_id,
        } => {
            let data = call(Method::ToggleExpand, Some(command_params(&connection_id, command_id)))?;
            let expanded = data.get("expanded").and_then(Value::as_bool).unwrap_or(false);
            println!(
                "#{}/{} {}",
                connection_id,
                command_id,
                if expanded { "expanded" } else { "collapsed" }
            );
        }
        Commands::ExpandAll => {
            let data = call(Method::ToggleExpandAll, None)?;
            let expanded = data.get("expand_all").and_then(Value::as_bool).unwrap_or(false);
            println!("{}", if expanded { "expanded all" } else { "collapsed all" });
        }
        Commands::Clear => {
            call(Method::Clear, None)?;
            println!("cleared");
        }
        Commands::Connect => {
            call(Method::Connect, None)?;
            println!("connecting");
        }
        Commands::Disconnect => {
            call(Method::Disconnect, None)?;
            println!("disconnecting");
        }
        Commands::Execute {
            connection_id,
            command_id,
        } => {
            let data = call(Method::Execute, Some(command_params(&connection_id, command_id)))?;
            print_execution(&data)?;
        }
        Commands::Run {
            query,
            database,
            params,
        } => {
            let data = call(
                Method::Execute,
                Some(json!({
                    "database_name": database,
                    "query_text": query,
                    "parameters": params,
                })),
            )?;
            print_execution(&data)?;
        }
        Commands::Copy {
            connection_id,
            command_id,
        } => {
            let data = call(Method::GetQuery, Some(command_params(&connection_id, command_id)))?;
            println!(
                "{}",
                data.get("query_text").and_then(Value::as_str).unwrap_or_default()
            );
        }
        Commands::Send => send_stdin()?,
    }
    Ok(())
}

fn command_params(connection_id: &str, command_id: u64) -> Value {
    json!({ "connection_id": connection_id, "command_id": command_id })
}

fn print_json(data: &Value) {
    match serde_json::to_string_pretty(data) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", data),
    }
}

fn print_execution(data: &Value) -> Result<(), ClientError> {
    let ok = data.get("ok").and_then(Value::as_bool).unwrap_or(false);
    let payload = data.get("payload").and_then(Value::as_str).unwrap_or_default();
    if ok {
        println!("{}", payload.trim_end());
        Ok(())
    } else {
        Err(ClientError::Daemon {
            code: "execution_failed".to_string(),
            message: payload.to_string(),
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SendSummary {
    accepted: usize,
    rejected: usize,
}

fn send_stdin() -> Result<(), ClientError> {
    let stdin = io::stdin();
    let summary = send_lines(stdin.lock(), |event| call(Method::Event, Some(event)))?;
    println!(
        "sent {} events ({} rejected)",
        summary.accepted + summary.rejected,
        summary.rejected
    );
    Ok(())
}

/// Sends every non-blank line. Rejections are reported and skipped; losing
/// the daemon stops the run.
fn send_lines<R, F>(input: R, mut send: F) -> Result<SendSummary, ClientError>
where
    R: BufRead,
    F: FnMut(Value) -> Result<Value, ClientError>,
{
    let mut summary = SendSummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.map_err(|err| ClientError::Read(err.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event: Value = match serde_json::from_str(trimmed) {
            Ok(event) => event,
            Err(err) => {
                eprintln!("line {}: not JSON: {}", index + 1, err);
                summary.rejected += 1;
                continue;
            }
        };

        match send(event) {
            Ok(_) => summary.accepted += 1,
            Err(ClientError::Daemon { code, message }) => {
                eprintln!("line {}: {}: {}", index + 1, code, message);
                summary.rejected += 1;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(summary)
}
