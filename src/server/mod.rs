// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod admin;
mod context;
mod initialization;
mod listener;
mod spawner;

pub use context::ServerContext;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize state: registry, cache engine, selector, pipeline.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context)?;

    // 3. Serve the data path until shutdown.
    listener::run(server_context).await
}
