use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::feed::alert::Alert;

/// Last-known-good alert list plus the time it was fetched.
///
/// The list is only ever replaced as a whole. A failed fetch never touches the cache, so readers
/// always see either the previous list or the complete new one.
#[derive(Clone, Debug)]
pub struct AlertCache {
    current: Arc<[Alert]>,
    fetched_at: Option<Instant>,
}

impl Default for AlertCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertCache {
    /// Empty cache that has never been refreshed.
    pub fn new() -> Self {
        Self {
            current: Arc::from(Vec::new()),
            fetched_at: None,
        }
    }

    /// `true` when no fetch has succeeded yet or `now - fetched_at >= interval`.
    pub fn needs_refresh(&self, now: Instant, interval: Duration) -> bool {
        match self.fetched_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= interval,
        }
    }

    /// Replace the list after a successful fetch.
    pub fn update(&mut self, alerts: Vec<Alert>, now: Instant) {
        self.current = Arc::from(alerts);
        self.fetched_at = Some(now);
    }

    /// Current list, highest severity first.
    pub fn read(&self) -> &[Alert] {
        &self.current
    }

    /// Shared handle to the current list.
    pub fn snapshot(&self) -> Arc<[Alert]> {
        Arc::clone(&self.current)
    }

    /// Time of the last successful fetch.
    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }
}

#[cfg(test)]
#[path = "../../tests/unit/feed/cache.rs"]
mod tests;
