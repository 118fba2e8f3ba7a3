// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SDK collectors: components that periodically sample one
//! category of observable and push it onto the transport's send queue.

pub mod goroutine;
pub mod logcapture;
pub mod periodic;
pub mod runtimestats;
pub mod watch;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::collectors::periodic::CollectorStatus;

/// Capability set every collector implements: name, enable,
/// disable, status.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;
    async fn enable(&self);
    async fn disable(&self);
    async fn status(&self) -> CollectorStatus;
}

/// Holds the set of registered collectors; `set_enabled` fans out to all of
/// them ("A registry holds them").
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: RwLock<Vec<Arc<dyn Collector>>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, collector: Arc<dyn Collector>) {
        self.collectors.write().await.push(collector);
    }

    pub async fn set_enabled(&self, enabled: bool) {
        let collectors = self.collectors.read().await;
        for collector in collectors.iter() {
            if enabled {
                collector.enable().await;
            } else {
                collector.disable().await;
            }
        }
    }

    pub async fn statuses(&self) -> Vec<(&'static str, CollectorStatus)> {
        let collectors = self.collectors.read().await;
        let mut out = Vec::with_capacity(collectors.len());
        for collector in collectors.iter() {
            out.push((collector.name(), collector.status().await));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Toggle(Arc<AtomicBool>);

    #[async_trait::async_trait]
    impl Collector for Toggle {
        fn name(&self) -> &'static str {
            "toggle"
        }
        async fn enable(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
        async fn disable(&self) {
            self.0.store(false, Ordering::SeqCst);
        }
        async fn status(&self) -> CollectorStatus {
            CollectorStatus { running: self.0.load(Ordering::SeqCst), ..Default::default() }
        }
    }

    #[tokio::test]
    async fn set_enabled_fans_out_to_all_registered_collectors() {
        let registry = CollectorRegistry::new();
        let flag = Arc::new(AtomicBool::new(false));
        registry.register(Arc::new(Toggle(Arc::clone(&flag)))).await;

        registry.set_enabled(true).await;
        assert!(flag.load(Ordering::SeqCst));

        registry.set_enabled(false).await;
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn statuses_reports_name_and_current_state() {
        let registry = CollectorRegistry::new();
        registry.register(Arc::new(Toggle(Arc::new(AtomicBool::new(true))))).await;
        let statuses = registry.statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].0, "toggle");
        assert!(statuses[0].1.running);
    }
}
