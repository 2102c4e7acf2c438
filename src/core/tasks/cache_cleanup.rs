// src/core/tasks/cache_cleanup.rs

//! The periodic cache cleanup task: TTL expiry, dangling-file repair, and
//! size-bounded eviction.

use crate::core::cache::CacheEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A task that periodically runs a cleanup cycle on the cache engine.
pub struct CacheCleanupTask {
    cache: Arc<CacheEngine>,
    interval: Duration,
}

impl CacheCleanupTask {
    pub fn new(cache: Arc<CacheEngine>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// The main run loop. A zero interval disables the loop entirely.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.interval.is_zero() {
            info!("Cache cleanup is disabled (cleanup_interval = 0). Task will not run.");
            return;
        }
        info!("Cache cleanup task started (interval {:?}).", self.interval);
        let mut interval = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so startup is not
        // dominated by a full cleanup cycle.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.cache.cleanup().await {
                        Ok(result) => {
                            info!(
                                "Cleanup cycle removed {} entries ({} bytes, {} stale) in {:?}.",
                                result.removed, result.bytes_freed, result.stale_removed, result.duration
                            );
                        }
                        Err(e) => warn!("Cache cleanup cycle failed: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Cache cleanup task shutting down.");
                    return;
                }
            }
        }
    }
}
