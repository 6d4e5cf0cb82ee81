//! Runtime configuration.
//!
//! Loaded from `~/.sqltap/config.toml` (or `$SQLTAP_CONFIG`). Every section and
//! field is optional; a missing file yields defaults.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DashboardError, Result};

pub const CONFIG_ENV: &str = "SQLTAP_CONFIG";
const SQLTAP_DIR: &str = ".sqltap";
const CONFIG_FILE: &str = "config.toml";

const DEFAULT_FILTER_DEBOUNCE_MS: u64 = 500;
const DEFAULT_ORPHAN_BUFFER_CAPACITY: usize = 256;
const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
const DEFAULT_RECONNECT_INITIAL_MS: u64 = 250;
const DEFAULT_RECONNECT_MAX_MS: u64 = 5_000;
const DEFAULT_EXECUTOR_TIMEOUT_MS: u64 = 10_000;

/// Which session gains focus when a new one appears.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSessionPolicy {
    /// The first session seen while nothing is focused keeps focus.
    #[default]
    FirstSessionWins,
    /// Every newly seen session takes focus.
    FollowNewest,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DashboardConfig {
    #[serde(default = "default_filter_debounce_ms")]
    pub filter_debounce_ms: u64,
    #[serde(default)]
    pub active_session_policy: ActiveSessionPolicy,
    #[serde(default = "default_true")]
    pub expand_by_default: bool,
    /// Results awaiting their issue event; `0` drops orphans outright.
    #[serde(default = "default_orphan_buffer_capacity")]
    pub orphan_buffer_capacity: usize,
}

impl DashboardConfig {
    pub fn filter_debounce(&self) -> Duration {
        Duration::from_millis(self.filter_debounce_ms)
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            filter_debounce_ms: DEFAULT_FILTER_DEBOUNCE_MS,
            active_session_policy: ActiveSessionPolicy::default(),
            expand_by_default: true,
            orphan_buffer_capacity: DEFAULT_ORPHAN_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DaemonConfig {
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    /// `host:port` of the proxy's telemetry socket. No feed when absent.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            address: None,
            auto_connect: true,
            reconnect_initial_ms: DEFAULT_RECONNECT_INITIAL_MS,
            reconnect_max_ms: DEFAULT_RECONNECT_MAX_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Program that receives the query on stdin. Execution is disabled when absent.
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_executor_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_ms: DEFAULT_EXECUTOR_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct SqltapConfig {
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

fn default_true() -> bool {
    true
}

fn default_filter_debounce_ms() -> u64 {
    DEFAULT_FILTER_DEBOUNCE_MS
}

fn default_orphan_buffer_capacity() -> usize {
    DEFAULT_ORPHAN_BUFFER_CAPACITY
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_reconnect_initial_ms() -> u64 {
    DEFAULT_RECONNECT_INITIAL_MS
}

fn default_reconnect_max_ms() -> u64 {
    DEFAULT_RECONNECT_MAX_MS
}

fn default_executor_timeout_ms() -> u64 {
    DEFAULT_EXECUTOR_TIMEOUT_MS
}

/// Returns `~/.sqltap`.
pub fn sqltap_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(SQLTAP_DIR))
}

pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    sqltap_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Loads configuration from `path` or the default location.
pub fn load_config(path: Option<&Path>) -> Result<SqltapConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => return Ok(SqltapConfig::default()),
        },
    };

    if !config_path.exists() {
        return Ok(SqltapConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| DashboardError::Io {
        context: format!("reading {}", config_path.display()),
        source,
    })?;

    toml::from_str::<SqltapConfig>(&content).map_err(|err| DashboardError::ConfigMalformed {
        path: config_path,
        details: err.to_string(),
    })
}
