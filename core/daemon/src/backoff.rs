use std::cmp;
use std::time::Duration;

/// Exponential delay between feed reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    next: Duration,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = cmp::max(initial, Duration::from_millis(1));
        let max = cmp::max(max, initial);
        Self {
            initial,
            max,
            next: initial,
            attempts: 0,
        }
    }

    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(initial_ms), Duration::from_millis(max_ms))
    }

    /// Returns the delay before the next attempt and doubles the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = cmp::min(self.next.saturating_mul(2), self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
