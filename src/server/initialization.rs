// src/server/initialization.rs

//! Builds every component and wires them into the shared `ProxyState`.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::cache::CacheEngine;
use crate::core::mirror::{MirrorBindings, MirrorSelector};
use crate::core::pipeline::{Pipeline, RetryingClient, Rewriter};
use crate::core::registry::{DistroKind, Registry};
use crate::core::state::{ProxyState, StatsState};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};
use url::Url;

/// Constructs the component graph: registry (leaf), cache engine, mirror
/// selector, rewriter, pipeline. Initial mirror bindings are published
/// synchronously so no request can observe an absent binding; benchmark
/// rounds then replace them in the background.
pub async fn setup(config: Config) -> Result<ServerContext> {
    let registry = Arc::new(Registry::load(config.mode).context("loading distribution registry")?);
    info!(
        "Loaded {} distribution(s): {}.",
        registry.distributions().len(),
        registry
            .distributions()
            .iter()
            .map(|d| d.ident)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let cache = CacheEngine::open(&config.cache)
        .await
        .context("opening cache engine")?;

    // Resolve configured per-distribution overrides; an override pins the
    // binding and disables benchmarking for that distribution.
    let mut overrides: HashMap<DistroKind, Url> = HashMap::new();
    for (ident, value) in &config.mirrors {
        let Some(dist) = registry.get_by_ident(ident) else {
            warn!("Ignoring mirror override for unknown distribution '{ident}'.");
            continue;
        };
        let url = dist
            .resolve_mirror(value)
            .with_context(|| format!("resolving mirror override for '{ident}'"))?;
        info!("Mirror for '{ident}' pinned to {url} by configuration.");
        overrides.insert(dist.kind, url);
    }

    let bindings = Arc::new(MirrorBindings::new());
    let selector = Arc::new(MirrorSelector::new(
        Arc::clone(&registry),
        Arc::clone(&bindings),
        config.benchmark.clone(),
        overrides,
    )?);

    // Publish a default binding for every active distribution now, and let
    // the asynchronous benchmark swap in the fastest mirror later.
    for dist in registry.distributions() {
        selector.select_async_into_bindings(dist.kind);
    }

    let transport = RetryingClient::new(&config.upstream)?;
    let rewriter = Rewriter::new(Arc::clone(&bindings));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&registry),
        rewriter,
        Arc::clone(&cache),
        transport,
    ));

    let (shutdown_tx, _) = broadcast::channel(8);
    let state = Arc::new(ProxyState {
        config,
        registry,
        cache,
        bindings,
        selector,
        pipeline,
        stats: StatsState::new(),
        shutdown_tx: shutdown_tx.clone(),
    });

    Ok(ServerContext {
        state,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}
