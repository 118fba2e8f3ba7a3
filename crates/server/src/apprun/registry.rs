// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of all known `AppRunPeer`s, keyed by `AppRunId`.
//!
//! Grounded on `crates/cli/src/broker/registry.rs::PodRegistry` (a
//! `RwLock<HashMap<...>>` with register/prune semantics), generalized to
//! app-run peers and to the "clear terminal runs" operator action instead
//! of health-based eviction.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::peer::AppRunPeer;
use super::types::{AppInfoPacket, AppRunId, AppRunInfo, AppRunStatus};

#[derive(Default)]
pub struct AppRunRegistry {
    peers: RwLock<std::collections::HashMap<AppRunId, Arc<AppRunPeer>>>,
}

impl AppRunRegistry {
    pub fn new() -> Self {
        Self { peers: RwLock::new(std::collections::HashMap::new()) }
    }

    pub async fn get(&self, id: &AppRunId) -> Option<Arc<AppRunPeer>> {
        self.peers.read().await.get(id).cloned()
    }

    /// `appinfo` entry point: first packet for an `AppRunId` creates the
    /// peer; a later one (after disconnect) is handled by
    /// `AppRunPeer::ingest_appinfo` itself.
    pub async fn get_or_create(&self, info: AppInfoPacket, now_ms: i64) -> Arc<AppRunPeer> {
        let id = info.apprunid;
        if let Some(existing) = self.peers.read().await.get(&id) {
            return Arc::clone(existing);
        }
        let mut guard = self.peers.write().await;
        if let Some(existing) = guard.get(&id) {
            return Arc::clone(existing);
        }
        let peer = Arc::new(AppRunPeer::new(id, info, now_ms));
        guard.insert(id, Arc::clone(&peer));
        peer
    }

    /// `getappruns{since}`: only runs whose `LastModTime > since`.
    pub async fn list_since(&self, since: i64) -> Vec<AppRunInfo> {
        let peers: Vec<Arc<AppRunPeer>> = self.peers.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(peers.len());
        for peer in peers {
            let info = peer.info_snapshot().await;
            if info.last_mod_time > since {
                out.push(info);
            }
        }
        out
    }

    /// Mark every peer whose transport connection just closed without
    /// `appdone` as disconnected.
    pub async fn mark_disconnected(&self, id: &AppRunId) {
        if let Some(peer) = self.get(id).await {
            peer.mark_disconnected().await;
        }
    }

    /// `clearnonactiveappruns`: drop every peer not currently `running`
    ///. Retention-by-age is an explicit Open Question left
    /// unimplemented — this RPC is the only eviction path (see DESIGN.md).
    pub async fn clear_non_active(&self) -> usize {
        let mut guard = self.peers.write().await;
        let mut to_remove = Vec::new();
        for (id, peer) in guard.iter() {
            if peer.status().await != AppRunStatus::Running {
                to_remove.push(*id);
            }
        }
        let removed = to_remove.len();
        for id in to_remove {
            guard.remove(&id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
