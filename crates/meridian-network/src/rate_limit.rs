//! Fixed-window rate limiting for served requests.

use std::time::{Duration, Instant};

/// Allows at most `allowed` occurrences per `period`.
#[derive(Debug, Clone)]
pub struct RateLimit {
    allowed: usize,
    period: Duration,
    window_start: Instant,
    count: usize,
}

impl RateLimit {
    /// Create a limiter.
    pub fn new(allowed: usize, period: Duration) -> Self {
        Self {
            allowed,
            period,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Per-minute limiter.
    pub fn per_minute(allowed: usize) -> Self {
        Self::new(allowed, Duration::from_secs(60))
    }

    /// Record `n` occurrences at `now`; returns whether they are within the limit.
    pub fn note_at(&mut self, n: usize, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= self.period {
            self.window_start = now;
            self.count = 0;
        }
        self.count = self.count.saturating_add(n);
        self.count <= self.allowed
    }

    /// Record `n` occurrences now.
    pub fn note(&mut self, n: usize) -> bool {
        self.note_at(n, Instant::now())
    }
}
