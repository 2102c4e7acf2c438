// src/core/state/core.rs

//! Defines the central `ProxyState` struct, holding all shared state.
//!
//! The registry is a leaf; the rewriter and pipeline hold references
//! downward only, and this struct owns the whole graph. It is wrapped in an
//! `Arc` and passed to the listener, the admin surface, and every
//! background task, replacing any package-global singletons.

use super::stats::StatsState;
use crate::config::Config;
use crate::core::cache::{CacheEngine, CacheStats, CleanupResult};
use crate::core::errors::ProxyError;
use crate::core::mirror::{MirrorBindings, MirrorSelector};
use crate::core::pipeline::Pipeline;
use crate::core::registry::Registry;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The central struct holding all shared proxy state.
pub struct ProxyState {
    /// The immutable runtime configuration.
    pub config: Config,
    /// The immutable distribution table.
    pub registry: Arc<Registry>,
    /// The disk-backed cache engine.
    pub cache: Arc<CacheEngine>,
    /// The per-distribution mirror bindings read by the rewriter.
    pub bindings: Arc<MirrorBindings>,
    /// The mirror selector driving benchmark rounds and refreshes.
    pub selector: Arc<MirrorSelector>,
    /// The request pipeline the listener dispatches into.
    pub pipeline: Arc<Pipeline>,
    /// Process-wide request statistics.
    pub stats: StatsState,
    /// Broadcast channel used to signal all background tasks to shut down.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ProxyState {
    // --- In-process admin entry points, consumed by the admin HTTP layer ---

    /// A point-in-time snapshot of the cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Deletes every cached entry. Readers mid-stream keep their handles.
    pub async fn cache_purge(&self) -> Result<(), ProxyError> {
        self.cache.purge().await
    }

    /// Runs one cleanup cycle immediately.
    pub async fn cache_cleanup(&self) -> Result<CleanupResult, ProxyError> {
        self.cache.cleanup().await
    }

    /// Clears benchmark results and recomputes every mirror binding.
    pub async fn mirrors_refresh(&self) {
        self.selector.refresh(None).await;
    }
}
