// src/server/listener.rs

//! The data-path listener: accepts proxy requests and dispatches every one
//! into the pipeline. Also owns signal handling and the shutdown sequence.

use super::context::ServerContext;
use anyhow::{Context, Result};
use axum::Router;
use axum::extract::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

/// Serves the data path until a termination signal arrives, then broadcasts
/// shutdown and drains the background tasks.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let state = Arc::clone(&ctx.state);

    let pipeline_state = Arc::clone(&state);
    let app = Router::new().fallback(move |req: Request| {
        let state = Arc::clone(&pipeline_state);
        async move {
            state.stats.increment_total_requests();
            Arc::clone(&state.pipeline).serve(req).await
        }
    });

    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .context("parsing listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding data-path listener on {addr}"))?;
    info!("PakMirror listening on http://{addr}");

    // SIGHUP refreshes mirror bindings without a restart.
    let sighup_state = Arc::clone(&state);
    let mut sighup_shutdown = ctx.shutdown_tx.subscribe();
    tokio::spawn(async move {
        let Ok(mut hup) = signal(SignalKind::hangup()) else {
            return;
        };
        loop {
            tokio::select! {
                _ = hup.recv() => {
                    info!("SIGHUP received; refreshing mirror bindings.");
                    sighup_state.mirrors_refresh().await;
                }
                _ = sighup_shutdown.recv() => return,
            }
        }
    });

    let shutdown_tx = ctx.shutdown_tx.clone();
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_termination().await;
            info!("Termination signal received; shutting down.");
            let _ = shutdown_tx.send(());
        })
        .await;

    // Drain background tasks; none of them should outlive the broadcast.
    let drain = async {
        while let Some(joined) = ctx.background_tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Background task ended abnormally: {e}");
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        warn!("Background tasks did not stop within 10s; aborting them.");
        ctx.background_tasks.abort_all();
    }

    serve_result.context("data-path server error")
}

/// Completes on SIGINT or SIGTERM.
async fn wait_for_termination() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = ctrl_c.await;
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = term.recv() => {}
    }
}
