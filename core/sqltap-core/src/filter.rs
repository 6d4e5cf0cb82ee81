//! Text filtering over recorded queries.
//!
//! The filtered view is always derived from the store on read; the index only
//! remembers which filter text is committed. Keystrokes are debounced: each
//! change re-arms one deadline, and only the text present when the deadline
//! passes is committed. Until then readers keep seeing the previous result.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::store::{EntityStore, QueryRecord, SessionKey};

/// A committed, case-folded filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterQuery {
    text: String,
    folded: String,
}

impl FilterQuery {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let folded = text.to_lowercase();
        Self { text, folded }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.folded.is_empty()
    }

    pub fn matches(&self, record: &QueryRecord) -> bool {
        self.is_empty() || record.query_text.to_lowercase().contains(&self.folded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryGroup {
    pub session: SessionKey,
    pub records: Vec<QueryRecord>,
}

/// Matching records of one session, in issue order.
pub fn filter_session<'a>(
    store: &'a EntityStore,
    key: &SessionKey,
    query: &FilterQuery,
) -> Vec<&'a QueryRecord> {
    store
        .queries_for(key)
        .into_iter()
        .filter(|record| query.matches(record))
        .collect()
}

/// Matching records grouped by session, in session first-seen order. With an
/// empty filter every session is returned, including those without queries.
pub fn filter_groups(store: &EntityStore, query: &FilterQuery) -> Vec<QueryGroup> {
    store
        .sessions()
        .filter_map(|session| {
            let key = session.key();
            let records: Vec<QueryRecord> = filter_session(store, &key, query)
                .into_iter()
                .cloned()
                .collect();
            if records.is_empty() && !query.is_empty() {
                return None;
            }
            Some(QueryGroup {
                session: key,
                records,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
struct PendingFilter {
    text: String,
    deadline: Instant,
}

#[derive(Debug)]
pub struct FilterIndex {
    debounce: Duration,
    applied: FilterQuery,
    pending: Option<PendingFilter>,
    recomputations: u64,
}

impl FilterIndex {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            applied: FilterQuery::default(),
            pending: None,
            recomputations: 0,
        }
    }

    /// Records new filter text and re-arms the single debounce deadline.
    pub fn text_changed(&mut self, text: impl Into<String>, now: Instant) {
        self.pending = Some(PendingFilter {
            text: text.into(),
            deadline: now + self.debounce,
        });
    }

    /// Commits the pending text once its deadline has passed. Returns `true`
    /// when a recomputation happened.
    pub fn poll(&mut self, now: Instant) -> bool {
        match &self.pending {
            Some(pending) if now >= pending.deadline => self.commit(),
            _ => false,
        }
    }

    /// Commits the pending text without waiting.
    pub fn flush(&mut self) -> bool {
        if self.pending.is_some() {
            self.commit()
        } else {
            false
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }

    pub fn applied(&self) -> &FilterQuery {
        &self.applied
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_ref().map(|pending| pending.text.as_str())
    }

    pub fn is_filtering(&self) -> bool {
        self.pending.is_some()
    }

    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    fn commit(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        self.applied = FilterQuery::new(pending.text);
        self.recomputations += 1;
        tracing::debug!(
            filter = %self.applied.text(),
            recomputations = self.recomputations,
            "Filter committed"
        );
        true
    }
}
