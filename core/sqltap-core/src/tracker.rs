//! Focus and liveness of sessions.
//!
//! The tracker owns a single piece of state, the focused connection id. Liveness
//! is read straight from the store's `SessionInfo`.

use sqltap_protocol::{ConnectionId, SessionPhase};

use crate::config::ActiveSessionPolicy;
use crate::store::SessionInfo;

#[derive(Debug, Default)]
pub struct SessionTracker {
    policy: ActiveSessionPolicy,
    active: Option<ConnectionId>,
}

impl SessionTracker {
    pub fn new(policy: ActiveSessionPolicy) -> Self {
        Self {
            policy,
            active: None,
        }
    }

    /// Called when an event brings a session into existence. Returns `true`
    /// if focus moved.
    pub fn pick_initial_active(&mut self, connection_id: &ConnectionId) -> bool {
        let should_focus = match self.policy {
            ActiveSessionPolicy::FirstSessionWins => self.active.is_none(),
            ActiveSessionPolicy::FollowNewest => {
                self.active.as_ref() != Some(connection_id)
            }
        };
        if should_focus {
            tracing::debug!(connection_id = %connection_id, policy = ?self.policy, "Active session changed");
            self.active = Some(connection_id.clone());
        }
        should_focus
    }

    /// Explicit selection; ids that have not been seen yet are accepted.
    pub fn set_active(&mut self, connection_id: ConnectionId) {
        self.active = Some(connection_id);
    }

    pub fn active(&self) -> Option<&ConnectionId> {
        self.active.as_ref()
    }

    pub fn is_selected(&self, connection_id: &ConnectionId) -> bool {
        self.active.as_ref() == Some(connection_id)
    }

    pub fn clear(&mut self) {
        self.active = None;
    }
}

/// A session is live until the proxy reports it finished.
pub fn is_active(session: &SessionInfo) -> bool {
    session.state == SessionPhase::Started
}
