// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outrig server: collector/indexer process for the observability sidecar.
//! Ingests SDK packets over a Unix domain socket and/or a loopback TCP
//! port, indexes per-app-run state, and serves the UI-facing WebSocket RPC
//! gateway over HTTP.

pub mod apprun;
pub mod concurrent_map;
pub mod config;
pub mod error;
pub mod ringbuffer;
pub mod rpc;
pub mod search;
pub mod state;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::state::ServerState;
use crate::transport::build_router;

/// Run the outrig server until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = Arc::new(ServerState::new());

    if let Some(path) = config.domain_socket() {
        let state = Arc::clone(&state);
        let path = path.to_owned();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = transport::ingest::serve_unix(&path, state, cancel).await {
                tracing::error!(err = %e, path, "unix domain socket listener failed");
            }
        });
    }

    if let Some(port) = config.tcp_port() {
        let state = Arc::clone(&state);
        let host = config.host.clone();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = transport::ingest::serve_tcp(&host, port, state, cancel).await {
                tracing::error!(err = %e, port, "tcp listener failed");
            }
        });
    }

    spawn_widget_reaper(
        Arc::clone(&state),
        config.reaper_interval(),
        config.widget_idle_ms,
        shutdown.child_token(),
    );

    tracing::info!("outrig server listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

/// Periodic sweep dropping idle log-widget search managers.
fn spawn_widget_reaper(
    state: Arc<ServerState>,
    interval: std::time::Duration,
    idle_ms: u64,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            state.reap_idle_log_widgets_after(crate::state::epoch_ms(), idle_ms).await;
        }
    });
}
