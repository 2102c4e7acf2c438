// src/server/context.rs

//! The fully initialized server, handed from setup to the run loop.

use crate::core::state::ProxyState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Everything the run loop needs: the shared state, the shutdown broadcast,
/// and the set of spawned background tasks to drain at teardown.
pub struct ServerContext {
    pub state: Arc<ProxyState>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<anyhow::Result<()>>,
}
