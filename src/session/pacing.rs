use std::time::{Duration, Instant};

/// Deadline-based frame pacing.
///
/// Each tick ends on `start + k * period`, so the sleep is `period - elapsed` and rounding does
/// not accumulate. A tick that overruns by more than a full period rebases the schedule on the
/// current time rather than bursting frames to catch up.
#[derive(Clone, Copy, Debug)]
pub struct FramePacer {
    period: Duration,
    deadline: Instant,
}

impl FramePacer {
    /// First tick starts at `now`.
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            deadline: now + period,
        }
    }

    /// Target period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// How long to sleep at the end of the tick finishing at `now`.
    pub fn next_sleep(&mut self, now: Instant) -> Duration {
        let sleep = self.deadline.saturating_duration_since(now);
        if now.saturating_duration_since(self.deadline) >= self.period {
            self.deadline = now + self.period;
        } else {
            self.deadline += self.period;
        }
        sleep
    }
}

/// Exponential backoff for sink restarts.
///
/// Failed starts and crashes of a sink that never became healthy share one failure count; each
/// doubles the wait up to `max`. The first crash after a healthy run restarts immediately. A sink
/// counts as healthy once it has kept accepting frames for `healthy_after` since its last start.
#[derive(Clone, Copy, Debug)]
pub struct RestartBackoff {
    initial: Duration,
    max: Duration,
    healthy_after: Duration,
    failures: u32,
    next_attempt: Option<Instant>,
    running_since: Option<Instant>,
}

impl RestartBackoff {
    /// Backoff starting at `initial`, capped at `max`, forgiven after `healthy_after` of progress.
    pub fn new(initial: Duration, max: Duration, healthy_after: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            healthy_after,
            failures: 0,
            next_attempt: None,
            running_since: None,
        }
    }

    /// `true` when a start attempt is allowed at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.next_attempt.is_none_or(|at| now >= at)
    }

    /// Consecutive failures since the sink was last healthy.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn delay(&self) -> Duration {
        let shift = self.failures.saturating_sub(1).min(16);
        self.initial.saturating_mul(1u32 << shift).min(self.max)
    }

    fn healthy_at(&self, now: Instant) -> bool {
        self.running_since
            .is_some_and(|since| now.saturating_duration_since(since) >= self.healthy_after)
    }

    /// Record a successful start at `now`. The failure count survives until the sink proves healthy.
    pub fn record_start(&mut self, now: Instant) {
        self.running_since = Some(now);
        self.next_attempt = None;
    }

    /// Record an accepted frame at `now`.
    pub fn record_progress(&mut self, now: Instant) {
        if self.failures > 0 && self.healthy_at(now) {
            tracing::debug!(failures = self.failures, "encoder healthy; backoff reset");
            self.failures = 0;
        }
    }

    /// Record a failed start at `now`; returns the wait before the next attempt.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.running_since = None;
        self.failures = self.failures.saturating_add(1);
        let delay = self.delay();
        self.next_attempt = Some(now + delay);
        delay
    }

    /// Record a running sink failing at `now`; returns the wait before the next attempt.
    pub fn record_crash(&mut self, now: Instant) -> Duration {
        if self.healthy_at(now) {
            self.failures = 0;
        }
        self.running_since = None;
        if self.failures == 0 {
            self.failures = 1;
            self.next_attempt = None;
            return Duration::ZERO;
        }
        self.record_failure(now)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/pacing.rs"]
mod tests;
