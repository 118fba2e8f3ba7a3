// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One `axum` WebSocket connection per UI tab: route registration, RPC
//! command dispatch, and a 5s ping/pong liveness check, via a split-socket
//! `tokio::select!` fan-in/fan-out loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::rpc::message::Message;
use crate::state::ServerState;

const PING_INTERVAL: Duration = Duration::from_secs(5);
/// Close the connection after this many consecutive missed pongs.
const MAX_MISSED_PONGS: u32 = 2;

#[derive(Debug, Deserialize)]
pub struct WsGatewayQuery {
    #[serde(rename = "routeId")]
    pub route_id: String,
}

/// `GET /ws?routeId=...` — WebSocket upgrade for one UI tab.
pub async fn ws_gateway_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<WsGatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, query.route_id))
}

async fn handle_connection(socket: WebSocket, state: Arc<ServerState>, route_id: String) {
    let mut outbound_rx = state.router.announce_route(route_id.clone()).await;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut ping_tick = tokio::time::interval(PING_INTERVAL);
    let mut missed_pongs = 0u32;

    loop {
        tokio::select! {
            _ = ping_tick.tick() => {
                if missed_pongs >= MAX_MISSED_PONGS {
                    tracing::debug!(route_id, "closing ws gateway connection after missed pongs");
                    break;
                }
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                missed_pongs += 1;
            }

            outbound = outbound_rx.recv() => {
                let Some(msg) = outbound else { break };
                let Ok(text) = serde_json::to_string(&msg) else { continue };
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }

            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_inbound_text(&state, &route_id, &text, &mut ws_tx).await;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.unsubscribe_all_events(&route_id).await;
    state.router.unannounce_route(&route_id).await;
}

async fn handle_inbound_text(
    state: &ServerState,
    route_id: &str,
    text: &str,
    ws_tx: &mut (impl SinkExt<WsMessage> + Unpin),
) {
    let Ok(msg) = serde_json::from_str::<Message>(text) else {
        tracing::warn!(route_id, "dropping malformed RPC message");
        return;
    };

    if msg.is_cancel() {
        let _ = state.router.dispatch_cancel(msg).await;
        return;
    }

    // A message with no `command` but a `resid` is a response fragment from
    // another route forwarded through `dispatch_request`; route it onward.
    let Some(command) = msg.command.clone() else {
        let _ = state.router.dispatch_response(msg).await;
        return;
    };

    let Some(req_id) = msg.req_id.clone() else {
        tracing::warn!(route_id, command, "RPC request missing reqid");
        return;
    };
    let data = msg.data.clone().unwrap_or(serde_json::Value::Null);
    let no_response = msg.no_response.unwrap_or(false);

    let response = match crate::rpc::handlers::dispatch(state, &command, &data, route_id).await {
        Ok(result) => Message::response(req_id, result),
        Err(err) => Message::error_response(req_id, err.as_str()),
    };

    if no_response {
        return;
    }
    if let Ok(text) = serde_json::to_string(&response) {
        let _ = ws_tx.send(WsMessage::Text(text.into())).await;
    }
}
