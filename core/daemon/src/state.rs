//! In-memory state managed by the daemon.
//!
//! One `Dashboard` behind one mutex. IPC handlers, the feed thread and the
//! ticker each run their whole operation under the lock.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

use sqltap_core::Dashboard;

pub struct SharedState {
    dashboard: Mutex<Dashboard>,
    started_at: DateTime<Utc>,
}

impl SharedState {
    pub fn new(dashboard: Dashboard) -> Self {
        Self {
            dashboard: Mutex::new(dashboard),
            started_at: Utc::now(),
        }
    }

    pub fn with_dashboard<R>(&self, f: impl FnOnce(&mut Dashboard) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn lock(&self) -> MutexGuard<'_, Dashboard> {
        match self.dashboard.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Dashboard lock poisoned; recovering last state");
                poisoned.into_inner()
            }
        }
    }
}
