// src/core/state/stats.rs

//! Process-wide request statistics, separate from the cache's own counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Holds counters and the start time exposed on the admin surface.
#[derive(Debug)]
pub struct StatsState {
    /// Total requests accepted on the data path since startup.
    total_requests: AtomicU64,
    started_at: Instant,
}

impl Default for StatsState {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsState {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Atomically increments the total number of requests served.
    pub fn increment_total_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets the total number of requests served.
    pub fn get_total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Seconds since the proxy started.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
