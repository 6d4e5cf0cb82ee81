//! # sqltap-core
//!
//! Reconciliation engine behind the sqltap dashboard. It folds the telemetry
//! stream of a database proxy (session state changes, issued queries and
//! their results) into one consistent view of sessions and queries.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Every event is applied to completion.
//! - **Not thread-safe**: The daemon wraps [`Dashboard`] in its own `Mutex`.
//! - **Tolerant**: Late, duplicated and out-of-order events never corrupt state.
//! - **Derived views**: Filtered output is recomputed from the store on read.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sqltap_core::{Dashboard, DashboardConfig};
//!
//! let mut dashboard = Dashboard::new(&DashboardConfig::default());
//! dashboard.on_wire_message(r#"{"ConnId":1,"CmdId":1,"Query":"SELECT 1"}"#)?;
//! let view = dashboard.view();
//! ```

pub mod config;
pub mod dashboard;
pub mod error;
pub mod executor;
pub mod filter;
pub mod store;
pub mod tracker;
pub mod transport;

pub use config::{
    load_config, ActiveSessionPolicy, DaemonConfig, DashboardConfig, ExecutorConfig, FeedConfig,
    SqltapConfig,
};
pub use dashboard::{Dashboard, DashboardStats, DashboardView, EventOutcome, SessionSummary};
pub use error::{DashboardError, Result};
pub use executor::{executor_from_config, ExecuteRequest, ExecutionOutcome, QueryExecutor};
pub use filter::{FilterIndex, FilterQuery, QueryGroup};
pub use store::{EntityStore, QueryRecord, QueryStatus, SessionInfo, SessionKey};
pub use transport::{NullTransport, Transport};

pub use sqltap_protocol::{CommandId, ConnectionId, TelemetryEvent};
