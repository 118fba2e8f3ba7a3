// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime stats collector: periodically snapshots
//! process/runtime-level numbers. Rust has no allocator-introspection API
//! in the standard library, so `memstats` fields that would require one are
//! left at zero rather than faked; this is recorded as a resolved open
//! question (no allocator-stats crate is in the dependency stack) rather
//! than a silent omission.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::collectors::goroutine::GoroutineRegistry;
use crate::collectors::periodic::{CollectorStatus, PeriodicExecutor};
use crate::collectors::Collector;
use crate::packet::{now_unix_millis, MemStats, RuntimeStatsSample};
use crate::transport::Transport;

const DEFAULT_PERIOD: Duration = Duration::from_secs(2);

/// Periodically emits `runtimestats` packets. Goroutine
/// count is sourced from the same [`GoroutineRegistry`] the goroutine
/// collector samples, keeping the two collectors' counts consistent.
pub struct RuntimeStatsCollector {
    goroutines: Arc<GoroutineRegistry>,
    transport: Transport,
    executor: PeriodicExecutor,
    period: Duration,
}

impl RuntimeStatsCollector {
    pub fn new(goroutines: Arc<GoroutineRegistry>, transport: Transport) -> Self {
        Self { goroutines, transport, executor: PeriodicExecutor::new(), period: DEFAULT_PERIOD }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub async fn status(&self) -> CollectorStatus {
        self.executor.status().await
    }

    fn tick(goroutines: &Arc<GoroutineRegistry>, transport: &Transport) {
        let numcpu = std::thread::available_parallelism().map(|n| n.get() as i64).unwrap_or(1);
        let sample = RuntimeStatsSample {
            ts: now_unix_millis(),
            goroutinecount: goroutines.snapshot().len() as i64,
            gomaxprocs: numcpu,
            numcpu,
            goos: std::env::consts::OS.to_owned(),
            goarch: std::env::consts::ARCH.to_owned(),
            goversion: format!("rustc-{}", option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")),
            pid: i64::from(std::process::id()),
            cwd: std::env::current_dir().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
            memstats: MemStats::default(),
        };
        if let Err(err) = transport.send("runtimestats", sample) {
            warn!(%err, "failed to enqueue runtimestats packet");
        }
    }
}

#[async_trait::async_trait]
impl Collector for RuntimeStatsCollector {
    fn name(&self) -> &'static str {
        "runtimestats"
    }

    async fn enable(&self) {
        let goroutines = Arc::clone(&self.goroutines);
        let transport = self.transport.clone();
        self.executor
            .enable(self.period, move || {
                Self::tick(&goroutines, &transport);
            })
            .await;
    }

    async fn disable(&self) {
        self.executor.disable().await;
    }

    async fn status(&self) -> CollectorStatus {
        self.executor.status().await
    }
}
