// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routes messages by `RouteId` and tracks in-flight requests so responses
//! find their way back to the originator.
//!
//! Single lock over both tables, "The RPC router's tables
//! are guarded by a single lock."

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use super::message::Message;

pub type RouteId = String;

const OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// Warn once an outbound queue is this full; `send_to` still delivers.
const OUTBOUND_QUEUE_WARN_THRESHOLD: usize = (OUTBOUND_QUEUE_CAPACITY * 9) / 10;

struct PendingRequest {
    source_route: RouteId,
    dest_route: RouteId,
}

struct RouterTables {
    routes: HashMap<RouteId, mpsc::Sender<Message>>,
    pending: HashMap<String, PendingRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterError {
    UnknownRoute,
    SendFailed,
}

/// Fans inbound/outbound `Message`s across registered routes (one per UI tab
/// or SDK connection) and the pending-request table.
pub struct Router {
    tables: RwLock<RouterTables>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { tables: RwLock::new(RouterTables { routes: HashMap::new(), pending: HashMap::new() }) }
    }

    /// Register (or replace) the outbound channel for `route_id`. Returns
    /// the receiving half the caller should drain into the transport.
    pub async fn announce_route(&self, route_id: RouteId) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        self.tables.write().await.routes.insert(route_id, tx);
        rx
    }

    pub async fn unannounce_route(&self, route_id: &str) {
        let mut tables = self.tables.write().await;
        tables.routes.remove(route_id);
        tables.pending.retain(|_, p| p.source_route != route_id && p.dest_route != route_id);
    }

    pub async fn send_to(&self, route_id: &str, msg: Message) -> Result<(), RouterError> {
        let tables = self.tables.read().await;
        let Some(tx) = tables.routes.get(route_id) else { return Err(RouterError::UnknownRoute) };
        if tx.capacity() <= OUTBOUND_QUEUE_CAPACITY - OUTBOUND_QUEUE_WARN_THRESHOLD {
            warn!(route_id, "outbound queue nearing its hard cap");
        }
        tx.try_send(msg).map_err(|_| RouterError::SendFailed)
    }

    /// Forward a request from `source_route` to `dest_route`, recording the
    /// `ReqId → (source, dest)` mapping so the response routes back.
    pub async fn dispatch_request(
        &self,
        source_route: RouteId,
        dest_route: RouteId,
        mut msg: Message,
    ) -> Result<(), RouterError> {
        let Some(req_id) = msg.req_id.clone() else { return Err(RouterError::UnknownRoute) };
        msg.source = Some(source_route.clone());
        {
            let mut tables = self.tables.write().await;
            let Some(tx) = tables.routes.get(&dest_route).cloned() else { return Err(RouterError::UnknownRoute) };
            tables.pending.insert(req_id, PendingRequest { source_route, dest_route });
            tx.try_send(msg).map_err(|_| RouterError::SendFailed)?;
        }
        Ok(())
    }

    /// Forward a response fragment back to the route that issued the
    /// originating request. Clears the pending entry unless `Cont` is set
    /// (""entries are cleared when a non-continuing response
    /// arrives").
    pub async fn dispatch_response(&self, msg: Message) -> Result<(), RouterError> {
        let Some(res_id) = msg.res_id.clone() else { return Err(RouterError::UnknownRoute) };
        let continuing = msg.is_continuing();
        let mut tables = self.tables.write().await;
        let source_route = if continuing {
            tables.pending.get(&res_id).map(|p| p.source_route.clone())
        } else {
            tables.pending.remove(&res_id).map(|p| p.source_route)
        };
        let Some(source_route) = source_route else {
            warn!(res_id = %res_id, "response for unknown or expired request");
            return Err(RouterError::UnknownRoute);
        };
        let Some(tx) = tables.routes.get(&source_route).cloned() else { return Err(RouterError::UnknownRoute) };
        drop(tables);
        tx.try_send(msg).map_err(|_| RouterError::SendFailed)
    }

    /// Forward a `Cancel` upstream to the request's destination route and
    /// forget the pending entry — no further responses are expected.
    pub async fn dispatch_cancel(&self, msg: Message) -> Result<(), RouterError> {
        let Some(req_id) = msg.req_id.clone() else { return Err(RouterError::UnknownRoute) };
        let mut tables = self.tables.write().await;
        let Some(pending) = tables.pending.remove(&req_id) else { return Err(RouterError::UnknownRoute) };
        let Some(tx) = tables.routes.get(&pending.dest_route).cloned() else { return Err(RouterError::UnknownRoute) };
        drop(tables);
        tx.try_send(msg).map_err(|_| RouterError::SendFailed)
    }

    pub async fn route_count(&self) -> usize {
        self.tables.read().await.routes.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.tables.read().await.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_then_response_round_trips_to_originator() {
        let router = Router::new();
        let mut ui_rx = router.announce_route("frontend:1".to_owned()).await;
        let mut sdk_rx = router.announce_route("sdk:appA".to_owned()).await;

        router
            .dispatch_request(
                "frontend:1".to_owned(),
                "sdk:appA".to_owned(),
                Message::request("getappruns", "r1", serde_json::json!({})),
            )
            .await
            .unwrap();
        let forwarded = sdk_rx.recv().await.unwrap();
        assert_eq!(forwarded.source.as_deref(), Some("frontend:1"));
        assert_eq!(router.pending_count().await, 1);

        router.dispatch_response(Message::response("r1", serde_json::json!({"ok": true}))).await.unwrap();
        let back = ui_rx.recv().await.unwrap();
        assert_eq!(back.res_id.as_deref(), Some("r1"));
        assert_eq!(router.pending_count().await, 0);
    }

    #[tokio::test]
    async fn streaming_response_keeps_pending_entry_until_final_fragment() {
        let router = Router::new();
        let _ui_rx = router.announce_route("frontend:1".to_owned()).await;
        let mut sdk_rx = router.announce_route("sdk:appA".to_owned()).await;
        router
            .dispatch_request(
                "frontend:1".to_owned(),
                "sdk:appA".to_owned(),
                Message::request("logsearchrequest", "r2", serde_json::json!({})),
            )
            .await
            .unwrap();
        let _ = sdk_rx.recv().await.unwrap();

        router.dispatch_response(Message::stream_response("r2", serde_json::json!({}), true)).await.unwrap();
        assert_eq!(router.pending_count().await, 1);

        router.dispatch_response(Message::stream_response("r2", serde_json::json!({}), false)).await.unwrap();
        assert_eq!(router.pending_count().await, 0);
    }

    #[tokio::test]
    async fn unannounce_route_clears_its_pending_entries() {
        let router = Router::new();
        let _ui_rx = router.announce_route("frontend:1".to_owned()).await;
        let _sdk_rx = router.announce_route("sdk:appA".to_owned()).await;
        router
            .dispatch_request(
                "frontend:1".to_owned(),
                "sdk:appA".to_owned(),
                Message::request("getappruns", "r1", serde_json::json!({})),
            )
            .await
            .unwrap();
        router.unannounce_route("frontend:1").await;
        assert_eq!(router.pending_count().await, 0);
    }
}
