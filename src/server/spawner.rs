// src/server/spawner.rs

//! Spawns the server's long-running background tasks.

use super::admin;
use super::context::ServerContext;
use crate::core::tasks::cache_cleanup::CacheCleanupTask;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Spawns all background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;

    // --- Admin / metrics server ---
    if state.config.admin.enabled {
        let admin_state = Arc::clone(state);
        let shutdown_rx_admin = shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            admin::run_admin_server(admin_state, shutdown_rx_admin).await;
            Ok(())
        });
    } else {
        info!("Admin server is disabled in the configuration.");
    }

    // --- Cache maintenance ---
    let cleanup = CacheCleanupTask::new(
        Arc::clone(&state.cache),
        state.config.cache.cleanup_interval,
    );
    let shutdown_rx_cleanup = shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        cleanup.run(shutdown_rx_cleanup).await;
        Ok(())
    });

    Ok(())
}
