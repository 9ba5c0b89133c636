//! Debounced auto-save bookkeeping.
//!
//! Each edited `(student, subject)` cell gets one pending deadline. A later
//! edit to the same cell pushes its deadline out again, so a save only fires
//! after the quiet period has passed without further edits to that cell. The
//! scheduler never sleeps itself: the main loop asks for `next_deadline()`,
//! waits on it alongside stdin, and collects `take_due()` keys.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SaveKey {
    pub student_id: String,
    pub subject: String,
}

impl SaveKey {
    pub fn new(student_id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            subject: subject.into(),
        }
    }
}

#[derive(Debug)]
pub struct SaveScheduler {
    quiet_period: Duration,
    pending: HashMap<SaveKey, Instant>,
}

impl SaveScheduler {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            pending: HashMap::new(),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Arms (or re-arms) the timer for `key` and returns its new deadline.
    pub fn schedule(&mut self, key: SaveKey, now: Instant) -> Instant {
        let deadline = now + self.quiet_period;
        self.pending.insert(key, deadline);
        deadline
    }

    pub fn cancel(&mut self, key: &SaveKey) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Removes and returns every key whose deadline is at or before `now`,
    /// sorted so saves run in a stable order.
    pub fn take_due(&mut self, now: Instant) -> Vec<SaveKey> {
        let mut due: Vec<SaveKey> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &due {
            self.pending.remove(k);
        }
        due.sort();
        due
    }

    /// Removes and returns everything still pending, due or not.
    pub fn drain(&mut self) -> Vec<SaveKey> {
        let mut all: Vec<SaveKey> = self.pending.drain().map(|(k, _)| k).collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for SaveScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}
