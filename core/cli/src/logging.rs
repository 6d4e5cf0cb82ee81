//! File logging for the CLI. Stdout is reserved for command output.

use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "sqltap.log";
const DEBUG_ENV: &str = "SQLTAP_DEBUG_LOG";

/// Installs a daily rolling file subscriber under `~/.sqltap/logs`.
///
/// Returns `None` when the directory cannot be created; the CLI then runs
/// without logging. Keep the guard alive until exit so buffered lines flush.
pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if let Err(err) = fs_err::create_dir_all(&dir) {
        eprintln!("sqltap: logging disabled: {}", err);
        return None;
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .is_ok();

    installed.then_some(guard)
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".sqltap").join(LOG_DIR))
}

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}
