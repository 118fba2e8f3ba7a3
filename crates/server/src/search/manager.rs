// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Widget-scoped long-lived search sessions backing log search streaming.
//!
//! A long-lived widget on the UI is a long-lived manager on the server: the
//! query is compiled once and reused across repeated search calls and,
//! for streaming widgets, across every newly ingested item. Without this,
//! every keystroke would re-scan the whole log ring.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::exec::{CompiledSearch, SearchObject};

/// A page of results pushed to a widget, either the initial page
/// (`logsearchrequest`) or an incremental push (`logstreamupdate`).
#[derive(Debug, Clone)]
pub struct StreamPage<T> {
    pub widget_id: String,
    pub filtered_count: u64,
    pub total_count: u64,
    pub items: Vec<T>,
}

/// Per-widget search state. Generic over the item type so the same manager
/// shape serves logs, goroutines, and watches.
pub struct SearchManager<T> {
    pub widget_id: String,
    query: RwLock<String>,
    compiled: RwLock<CompiledSearch>,
    last_used_ms: AtomicU64,
    view_offset: AtomicU64,
    view_limit: AtomicU64,
    scroll_buffer: AtomicU64,
    filtered_count: AtomicU64,
    total_count: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SearchManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(widget_id: impl Into<String>, query: impl Into<String>, now_ms: u64) -> Self {
        let query = query.into();
        let compiled = CompiledSearch::compile(&query);
        Self {
            widget_id: widget_id.into(),
            query: RwLock::new(query),
            compiled: RwLock::new(compiled),
            last_used_ms: AtomicU64::new(now_ms),
            view_offset: AtomicU64::new(0),
            view_limit: AtomicU64::new(100),
            scroll_buffer: AtomicU64::new(50),
            filtered_count: AtomicU64::new(0),
            total_count: AtomicU64::new(0),
            _marker: PhantomData,
        }
    }

    pub fn set_window(&self, offset: u64, limit: u64, buffer: u64) {
        self.view_offset.store(offset, Ordering::Relaxed);
        self.view_limit.store(limit, Ordering::Relaxed);
        self.scroll_buffer.store(buffer, Ordering::Relaxed);
    }

    /// `logwidgetadmin{keepalive:true}` resets the idle clock.
    pub fn touch(&self, now_ms: u64) {
        self.last_used_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn is_idle(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_used_ms.load(Ordering::Relaxed)) > timeout_ms
    }

    pub async fn set_query(&self, query: impl Into<String>) {
        let query = query.into();
        let compiled = CompiledSearch::compile(&query);
        *self.compiled.write().await = compiled;
        *self.query.write().await = query;
    }

    /// `logsearchrequest`: scan every currently retained item and return the
    /// windowed page `[offset, offset+limit)` plus `scroll_buffer` lines of
    /// padding on either side.
    pub async fn snapshot_page<'a, F>(&self, items: &'a [T], to_object: F) -> StreamPage<T>
    where
        F: Fn(&'a T) -> Box<dyn SearchObject + 'a>,
    {
        let compiled = self.compiled.read().await;
        let total_count = items.len() as u64;
        let matched: Vec<&T> =
            items.iter().filter(|item| compiled.evaluate(to_object(item).as_ref())).collect();
        let filtered_count = matched.len() as u64;

        self.total_count.store(total_count, Ordering::Relaxed);
        self.filtered_count.store(filtered_count, Ordering::Relaxed);

        let offset = self.view_offset.load(Ordering::Relaxed) as usize;
        let limit = self.view_limit.load(Ordering::Relaxed) as usize;
        let buffer = self.scroll_buffer.load(Ordering::Relaxed) as usize;
        let start = offset.saturating_sub(buffer);
        let end = (offset + limit + buffer).min(matched.len());
        let page = if start < end {
            matched[start..end].iter().map(|i| (*i).clone()).collect()
        } else {
            Vec::new()
        };

        StreamPage { widget_id: self.widget_id.clone(), filtered_count, total_count, items: page }
    }

    /// Re-evaluate a single newly ingested item against the compiled query,
    /// bumping the running counters. Returns `Some(item)` if it matched (the
    /// caller pushes a `logstreamupdate` with exactly this one line).
    pub async fn on_new_item<'a, F>(&self, item: &'a T, to_object: F) -> Option<T>
    where
        F: Fn(&'a T) -> Box<dyn SearchObject + 'a>,
    {
        self.total_count.fetch_add(1, Ordering::Relaxed);
        let matched = self.compiled.read().await.evaluate(to_object(item).as_ref());
        if matched {
            self.filtered_count.fetch_add(1, Ordering::Relaxed);
            Some(item.clone())
        } else {
            None
        }
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.filtered_count.load(Ordering::Relaxed), self.total_count.load(Ordering::Relaxed))
    }
}

/// Attach a streaming listener: every item broadcast on `rx` is re-filtered
/// against `manager`'s compiled query and, if it matches, pushed to `push`
/// as a one-line `StreamPage`.
pub fn spawn_streaming<T, F>(
    manager: std::sync::Arc<SearchManager<T>>,
    mut rx: broadcast::Receiver<T>,
    to_object: F,
    push: mpsc::Sender<StreamPage<T>>,
    cancel: CancellationToken,
) where
    T: Clone + Send + Sync + 'static,
    F: for<'a> Fn(&'a T) -> Box<dyn SearchObject + 'a> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = rx.recv() => {
                    match item {
                        Ok(item) => {
                            if let Some(matched) = manager.on_new_item(&item, &to_object).await {
                                let (filtered_count, total_count) = manager.counts();
                                let update = StreamPage {
                                    widget_id: manager.widget_id.clone(),
                                    filtered_count,
                                    total_count,
                                    items: vec![matched],
                                };
                                if push.send(update).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });
}
