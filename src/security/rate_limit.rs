//! Per-actor sliding-window rate limiter for mutating calls.
//!
//! # Design Decisions
//! - Timestamps are recorded only for admitted calls, so a rejected call
//!   never extends the wait
//! - Per-key exclusion through `DashMap` shards; no global lock
//! - Idle actors are dropped by `purge_idle`, run from the maintenance task

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::observability::metrics;

/// A rejected check, with the time until the next call would pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttled {
    pub retry_after: Duration,
}

/// Sliding-window counter keyed by actor id.
pub struct RateLimiter {
    window: Duration,
    limit: usize,
    hits: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            hits: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admit or reject one call for `actor` now.
    pub fn check(&self, actor: &str) -> Result<(), Throttled> {
        self.check_at(actor, Instant::now())
    }

    pub fn check_at(&self, actor: &str, now: Instant) -> Result<(), Throttled> {
        let mut entry = self.hits.entry(actor.to_string()).or_default();
        let hits = entry.value_mut();

        while let Some(&oldest) = hits.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.limit {
            let retry_after = hits
                .front()
                .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(self.window);
            tracing::warn!(actor, limit = self.limit, window_secs = self.window.as_secs(), "Rate limit exceeded");
            metrics::record_rate_limited();
            return Err(Throttled { retry_after });
        }

        hits.push_back(now);
        Ok(())
    }

    /// Forget actors with no call inside the window. Returns how many were dropped.
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    pub fn purge_idle_at(&self, now: Instant) -> usize {
        let before = self.hits.len();
        self.hits.retain(|_, hits| {
            hits.back()
                .is_some_and(|&last| now.saturating_duration_since(last) < self.window)
        });
        before - self.hits.len()
    }

    /// Number of actors currently tracked.
    pub fn tracked_actors(&self) -> usize {
        self.hits.len()
    }
}
