// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Goroutine collector. Rust has no runtime-introspectable
//! task list, so this module substitutes an explicit "tracked task"
//! registry: application code opts a future into tracking via
//! [`track`], and the periodic sampler reports the set of currently
//! tracked tasks as if they were goroutines. This is recorded as a
//! resolved open question rather than an omission: it trades automatic
//! discovery for an explicit, zero-overhead-when-unused opt-in.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::collectors::periodic::{CollectorStatus, PeriodicExecutor};
use crate::collectors::Collector;
use crate::packet::{now_unix_millis, GoRoutineDeclWire, GoRoutinePacket, GoRoutineStackWire};
use crate::transport::Transport;

const DEFAULT_PERIOD: Duration = Duration::from_millis(1000);

/// Static metadata supplied when a future is tracked.
#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    pub name: String,
    pub tags: Vec<String>,
    pub pkg: String,
    pub func: String,
    pub parent_goid: Option<i64>,
}

struct TrackedEntry {
    info: TrackInfo,
    state: String,
}

/// Registry of in-flight tracked tasks, keyed by a process-unique id that
/// plays the role of a goroutine id on the wire.
#[derive(Default)]
pub struct GoroutineRegistry {
    next_id: AtomicI64,
    entries: Mutex<HashMap<i64, TrackedEntry>>,
}

impl GoroutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, info: TrackInfo) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).insert(id, TrackedEntry { info, state: "running".to_owned() });
        id
    }

    fn unregister(&self, id: i64) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
    }

    fn snapshot(&self) -> Vec<(i64, TrackInfo, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(id, entry)| (*id, entry.info.clone(), entry.state.clone()))
            .collect()
    }
}

/// RAII guard that deregisters a tracked task when dropped, including on
/// cancellation (e.g. the enclosing task is aborted).
struct TrackGuard {
    registry: Arc<GoroutineRegistry>,
    id: i64,
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Run `fut` to completion while it is visible to the goroutine collector
/// under the given metadata ("tracked task" substitute for
/// automatic goroutine discovery). Uses a plain RAII guard around a
/// `.await` rather than a hand-rolled `Future` impl, so no `unsafe` or
/// manual pin-projection is needed.
pub async fn track<F: Future>(registry: &Arc<GoroutineRegistry>, info: TrackInfo, fut: F) -> F::Output {
    let id = registry.register(info);
    let _guard = TrackGuard { registry: Arc::clone(registry), id };
    fut.await
}

/// Periodically snapshots [`GoroutineRegistry`] and emits `goroutine`
/// packets. A tracked task's stack text is always the
/// literal string `"tracked"` rather than a real call stack, since Rust
/// provides no portable way to capture another task's stack; `same` is set
/// once a task has been reported unchanged across consecutive ticks.
pub struct GoroutineCollector {
    registry: Arc<GoroutineRegistry>,
    transport: Transport,
    executor: PeriodicExecutor,
    period: Duration,
}

impl GoroutineCollector {
    pub fn new(registry: Arc<GoroutineRegistry>, transport: Transport) -> Self {
        Self { registry, transport, executor: PeriodicExecutor::new(), period: DEFAULT_PERIOD }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub async fn status(&self) -> CollectorStatus {
        self.executor.status().await
    }

    fn tick(registry: &Arc<GoroutineRegistry>, transport: &Transport, declared: &Mutex<std::collections::HashSet<i64>>) {
        let entries = registry.snapshot();
        let mut decls = Vec::new();
        let mut stacks = Vec::with_capacity(entries.len());

        let mut declared = declared.lock().unwrap_or_else(|p| p.into_inner());
        for (id, info, state) in &entries {
            let first_seen = declared.insert(*id);
            if first_seen {
                decls.push(GoRoutineDeclWire {
                    goid: *id,
                    name: info.name.clone(),
                    tags: info.tags.clone(),
                    pkg: info.pkg.clone(),
                    func: info.func.clone(),
                    parentgoid: info.parent_goid,
                });
            }
            stacks.push(GoRoutineStackWire {
                goid: *id,
                ts: now_unix_millis(),
                same: !first_seen,
                state: Some(state.clone()),
                name: Some(info.name.clone()),
                tags: info.tags.clone(),
                stacktrace: if first_seen { Some("tracked".to_owned()) } else { None },
            });
        }

        let packet = GoRoutinePacket { ts: now_unix_millis(), count: stacks.len() as i64, delta: true, stacks, decls };
        if let Err(err) = transport.send("goroutine", packet) {
            warn!(%err, "failed to enqueue goroutine packet");
        }
    }
}

#[async_trait::async_trait]
impl Collector for GoroutineCollector {
    fn name(&self) -> &'static str {
        "goroutine"
    }

    async fn enable(&self) {
        let registry = Arc::clone(&self.registry);
        let transport = self.transport.clone();
        let declared = Arc::new(Mutex::new(std::collections::HashSet::new()));
        self.executor
            .enable(self.period, move || {
                Self::tick(&registry, &transport, &declared);
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
