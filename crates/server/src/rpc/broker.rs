// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publish/subscribe event broker with per-event-type history replay.
//!
//! Pairs a `broadcast::Sender` per event type with a cached-history ring so
//! a subscriber that joins late still gets recent events on subscribe,
//! generalized to arbitrary named event types with scope filtering and one
//! lock per event type rather than one lock for everything.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

const BROADCAST_CAPACITY: usize = 256;
const HISTORY_CAPACITY: usize = 100;

/// A published event. `scope` is an opaque string the publisher and
/// subscribers agree on (e.g. an `AppRunId`); `AllScopes` subscribers match
/// every scope.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: String,
    pub scope: String,
    pub data: serde_json::Value,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Named(String),
}

impl Scope {
    fn matches(&self, scope: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(s) => s == scope,
        }
    }
}

struct EventTypeChannel {
    tx: broadcast::Sender<Event>,
    history: VecDeque<Event>,
}

impl EventTypeChannel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx, history: VecDeque::with_capacity(HISTORY_CAPACITY) }
    }

    fn record(&mut self, event: Event) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

pub struct EventBroker {
    channels: RwLock<HashMap<String, Arc<RwLock<EventTypeChannel>>>>,
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroker {
    pub fn new() -> Self {
        Self { channels: RwLock::new(HashMap::new()) }
    }

    async fn channel_for(&self, event_type: &str) -> Arc<RwLock<EventTypeChannel>> {
        if let Some(ch) = self.channels.read().await.get(event_type) {
            return Arc::clone(ch);
        }
        let mut guard = self.channels.write().await;
        if let Some(ch) = guard.get(event_type) {
            return Arc::clone(ch);
        }
        let ch = Arc::new(RwLock::new(EventTypeChannel::new()));
        guard.insert(event_type.to_owned(), Arc::clone(&ch));
        ch
    }

    /// `eventpublish`: fan out to every subscriber of `event.event_type`
    /// whose scope matches, and record it in that type's history.
    pub async fn publish(&self, event: Event) {
        let ch = self.channel_for(&event.event_type).await;
        let mut guard = ch.write().await;
        let _ = guard.tx.send(event.clone());
        guard.record(event);
    }

    /// `eventsub`: subscribe to one event type, filtered by scope.
    pub async fn subscribe(&self, event_type: &str) -> broadcast::Receiver<Event> {
        self.channel_for(event_type).await.read().await.tx.subscribe()
    }

    /// `eventreadhistory`: replay up to `limit` of the most recent matching
    /// events for this event type, from the bounded per-event-type history.
    pub async fn read_history(&self, event_type: &str, scope: &Scope, limit: usize) -> Vec<Event> {
        let ch = self.channel_for(event_type).await;
        let guard = ch.read().await;
        guard.history.iter().rev().filter(|e| scope.matches(&e.scope)).take(limit).cloned().collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}

/// Whether `event` matches a subscriber's `(EventType, Scope)` filter.
pub fn matches(event: &Event, event_type: &str, scope: &Scope) -> bool {
    event.event_type == event_type && scope.matches(&event.scope)
}
