// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the Outrig server, and the SDK-facing
//! ingest listeners.
//!
//! The gateway binds loopback-only and carries no auth middleware; there is
//! no bearer-token layer here, by omission rather than replacement.

pub mod ingest;
pub mod ws_gateway;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::state::ServerState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    apprun_count: usize,
}

async fn health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let apprun_count = state.apprun_registry.len().await;
    Json(HealthResponse { status: "ok", apprun_count })
}

/// Build the axum `Router` serving the WebSocket gateway and health check.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/ws", get(ws_gateway::ws_gateway_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
