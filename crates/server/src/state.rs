// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared server state: the app-run registry, RPC router and event broker,
//! and per-widget log search managers.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::apprun::{AppRunPeer, AppRunRegistry};
use crate::apprun::types::{AppRunId, LogLine};
use crate::concurrent_map::ConcurrentMap;
use crate::rpc::broker::{self, EventBroker, Scope};
use crate::rpc::message::Message;
use crate::rpc::router::Router;
use crate::search::manager::SearchManager;

/// Idle widgets are dropped if they haven't received a `keepalive` within
/// this window.
pub const WIDGET_IDLE_TIMEOUT_MS: u64 = 60_000;
const LOG_STREAM_PAGE_QUEUE: usize = 64;

pub struct ServerState {
    pub apprun_registry: Arc<AppRunRegistry>,
    pub router: Arc<Router>,
    pub event_broker: Arc<EventBroker>,
    pub log_managers: ConcurrentMap<String, SearchManager<Arc<LogLine>>>,
    log_stream_cancel: ConcurrentMap<String, CancellationToken>,
    pub marked_lines: ConcurrentMap<String, RwLock<HashSet<i64>>>,
    /// Keyed by `"{route_id}\u{1}{event_type}\u{1}{scope}"`, tracking the
    /// cancel handle for each `eventsub`/`eventunsub` pair.
    event_stream_cancel: ConcurrentMap<String, CancellationToken>,
    /// Keyed by route id: every subscription key owned by that route, so a
    /// route-down event (connection close) can tear them all down via
    /// [`ServerState::unsubscribe_all_events`] ("route-down events
    /// let subsystems evict per-route state").
    event_stream_routes: ConcurrentMap<String, RwLock<Vec<String>>>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            apprun_registry: Arc::new(AppRunRegistry::new()),
            router: Arc::new(Router::new()),
            event_broker: Arc::new(EventBroker::new()),
            log_managers: ConcurrentMap::new(),
            log_stream_cancel: ConcurrentMap::new(),
            marked_lines: ConcurrentMap::new(),
            event_stream_cancel: ConcurrentMap::new(),
            event_stream_routes: ConcurrentMap::new(),
        }
    }

    /// Get-or-create the persistent search manager for a log widget
    /// ("a long-lived widget on the UI is a long-lived manager on
    /// the server").
    pub async fn log_search_manager(
        &self,
        widget_id: &str,
        query: &str,
        _apprun_id: AppRunId,
    ) -> Arc<SearchManager<Arc<LogLine>>> {
        let widget_id_owned = widget_id.to_owned();
        let query = query.to_owned();
        self.log_managers.get_or_create(widget_id_owned.clone(), || SearchManager::new(widget_id_owned, query, epoch_ms())).await
    }

    /// Attach (or re-attach) a streaming listener for `manager` that pushes
    /// `logstreamupdate` messages to `route_id` as new log lines arrive on
    /// `peer`'s broadcast channel.
    pub async fn attach_log_stream(
        &self,
        manager: Arc<SearchManager<Arc<LogLine>>>,
        peer: &AppRunPeer,
        route_id: String,
    ) {
        if let Some(prev) = self.log_stream_cancel.get(&manager.widget_id).await {
            prev.cancel();
        }
        let cancel = CancellationToken::new();
        self.log_stream_cancel.set(manager.widget_id.clone(), cancel.clone()).await;

        let rx = peer.subscribe_logs();
        let (tx, mut out_rx) = mpsc::channel(LOG_STREAM_PAGE_QUEUE);
        crate::search::manager::spawn_streaming(
            Arc::clone(&manager),
            rx,
            |l| Box::new((**l).clone()),
            tx,
            cancel.clone(),
        );

        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            while let Some(page) = out_rx.recv().await {
                let msg = Message {
                    command: Some("logstreamupdate".to_owned()),
                    data: Some(serde_json::json!({
                        "widgetid": page.widget_id,
                        "filteredcount": page.filtered_count,
                        "totalcount": page.total_count,
                        "lines": page.items,
                    })),
                    ..Default::default()
                };
                if router.send_to(&route_id, msg).await.is_err() {
                    break;
                }
            }
        });
    }

    /// `eventsub`: subscribe `route_id` to `event_type`/`scope`, pushing an
    /// `eventupdate` message for every future matching publish.
    /// Re-subscribing the same `(route_id, event_type, scope)` triple
    /// replaces the previous subscription rather than stacking a second
    /// listener.
    pub async fn subscribe_events(&self, route_id: &str, event_type: &str, scope: Scope) {
        let key = event_sub_key(route_id, event_type, &scope);
        if let Some(prev) = self.event_stream_cancel.delete(&key).await {
            prev.cancel();
        }

        let cancel = CancellationToken::new();
        self.event_stream_cancel.set(key.clone(), cancel.clone()).await;

        let list = self.event_stream_routes.get_or_create(route_id.to_owned(), || RwLock::new(Vec::new())).await;
        list.write().await.push(key);

        let mut rx = self.event_broker.subscribe(event_type).await;
        let router = Arc::clone(&self.router);
        let route_id = route_id.to_owned();
        let event_type = event_type.to_owned();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let event = match event {
                            Ok(event) => event,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        };
                        if !broker::matches(&event, &event_type, &scope) {
                            continue;
                        }
                        let msg = Message {
                            command: Some("eventupdate".to_owned()),
                            data: Some(serde_json::json!({
                                "eventtype": event.event_type,
                                "scope": event.scope,
                                "data": event.data,
                                "ts": event.ts,
                            })),
                            ..Default::default()
                        };
                        if router.send_to(&route_id, msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// `eventunsub`: cancel one `(route_id, event_type, scope)` subscription.
    pub async fn unsubscribe_events(&self, route_id: &str, event_type: &str, scope: &Scope) {
        let key = event_sub_key(route_id, event_type, scope);
        if let Some(cancel) = self.event_stream_cancel.delete(&key).await {
            cancel.cancel();
        }
        if let Some(list) = self.event_stream_routes.get(&route_id.to_owned()).await {
            list.write().await.retain(|k| k != &key);
        }
    }

    /// `eventunsuball`: cancel every subscription owned by `route_id`, and
    /// the implicit cleanup run when a route goes down (connection close).
    pub async fn unsubscribe_all_events(&self, route_id: &str) {
        if let Some(list) = self.event_stream_routes.delete(&route_id.to_owned()).await {
            for key in list.read().await.iter() {
                if let Some(cancel) = self.event_stream_cancel.delete(key).await {
                    cancel.cancel();
                }
            }
        }
    }

    /// `logwidgetadmin{drop:true}` and idle reaping both go through here.
    pub async fn drop_log_widget(&self, widget_id: &str) {
        if let Some(cancel) = self.log_stream_cancel.delete(&widget_id.to_owned()).await {
            cancel.cancel();
        }
        self.log_managers.delete(&widget_id.to_owned()).await;
        self.marked_lines.delete(&widget_id.to_owned()).await;
    }

    /// Periodic sweep dropping widgets that haven't had a `keepalive` inside
    /// `idle_ms`.
    pub async fn reap_idle_log_widgets_after(&self, now_ms: u64, idle_ms: u64) {
        for widget_id in self.log_managers.keys().await {
            if let Some(manager) = self.log_managers.get(&widget_id).await {
                if manager.is_idle(now_ms, idle_ms) {
                    self.drop_log_widget(&widget_id).await;
                }
            }
        }
    }

    /// Convenience wrapper using the default [`WIDGET_IDLE_TIMEOUT_MS`].
    pub async fn reap_idle_log_widgets(&self, now_ms: u64) {
        self.reap_idle_log_widgets_after(now_ms, WIDGET_IDLE_TIMEOUT_MS).await;
    }
}

fn event_sub_key(route_id: &str, event_type: &str, scope: &Scope) -> String {
    let scope_str = match scope {
        Scope::All => "*".to_owned(),
        Scope::Named(s) => s.clone(),
    };
    format!("{route_id}\u{1}{event_type}\u{1}{scope_str}")
}

pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
