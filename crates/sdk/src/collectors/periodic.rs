// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared periodic-tick primitive used by the goroutine, watch, and
//! runtime-stats collectors: a ticker-with-cancellation shape built on
//! `tokio::select!` over a shutdown token and an interval tick.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Snapshot of a collector's health, surfaced via `collectorstatus` packets.
#[derive(Debug, Clone, Default)]
pub struct CollectorStatus {
    pub running: bool,
    pub info: Option<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub collect_duration: Option<Duration>,
}

/// Wraps a synchronous sampling closure and a period; `enable` spawns a task
/// that invokes it immediately then on each tick, `disable` stops the task.
/// A panic inside the closure is recovered and reported through
/// [`PeriodicExecutor::status`] rather than taking down the process.
pub struct PeriodicExecutor {
    running: Arc<AtomicBool>,
    in_tick: Arc<AtomicBool>,
    status: Arc<RwLock<CollectorStatus>>,
    cancel: Arc<RwLock<Option<CancellationToken>>>,
}

impl Default for PeriodicExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodicExecutor {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            in_tick: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(CollectorStatus::default())),
            cancel: Arc::new(RwLock::new(None)),
        }
    }

    /// Idempotent: calling `enable` while already enabled is a no-op.
    pub async fn enable<F>(&self, period: Duration, tick: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let token = CancellationToken::new();
        *self.cancel.write().await = Some(token.clone());

        let running = Arc::clone(&self.running);
        let in_tick = Arc::clone(&self.in_tick);
        let status = Arc::clone(&self.status);
        let tick = Arc::new(tick);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                run_one_tick(&in_tick, &status, Arc::clone(&tick)).await;
            }
            running.store(false, Ordering::Release);
        });
    }

    pub async fn disable(&self) {
        if let Some(token) = self.cancel.write().await.take() {
            token.cancel();
        }
        self.running.store(false, Ordering::Release);
        let mut status = self.status.write().await;
        status.running = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> CollectorStatus {
        self.status.read().await.clone()
    }
}

async fn run_one_tick(
    in_tick: &Arc<AtomicBool>,
    status: &Arc<RwLock<CollectorStatus>>,
    tick: Arc<dyn Fn() + Send + Sync>,
) {
    if in_tick.swap(true, Ordering::AcqRel) {
        status.write().await.warnings.push("tick skipped: previous tick still running".to_owned());
        return;
    }

    let started = std::time::Instant::now();
    let result =
        tokio::task::spawn_blocking(move || std::panic::catch_unwind(AssertUnwindSafe(|| tick())))
            .await;
    let elapsed = started.elapsed();
    in_tick.store(false, Ordering::Release);

    let mut status = status.write().await;
    status.running = true;
    status.collect_duration = Some(elapsed);
    match result {
        Ok(Ok(())) => {}
        Ok(Err(panic)) => {
            let msg = panic_message(&panic);
            error!(panic = %msg, "collector tick panicked");
            status.errors.push(format!("panic: {msg}"));
        }
        Err(join_err) => {
            error!(err = %join_err, "collector tick task failed to join");
            status.errors.push(format!("join error: {join_err}"));
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn enable_invokes_on_schedule() {
        let executor = PeriodicExecutor::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        executor.enable(Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::Relaxed);
        }).await;

        tokio::time::sleep(Duration::from_millis(55)).await;
        executor.disable().await;
        assert!(count.load(Ordering::Relaxed) >= 2, "expected multiple ticks, got {}", count.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn enable_is_idempotent() {
        let executor = PeriodicExecutor::new();
        let count = Arc::new(AtomicU32::new(0));
        let c1 = Arc::clone(&count);
        executor.enable(Duration::from_millis(200), move || { c1.fetch_add(1, Ordering::Relaxed); }).await;
        let c2 = Arc::clone(&count);
        executor.enable(Duration::from_millis(1), move || { c2.fetch_add(1, Ordering::Relaxed); }).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        executor.disable().await;
        // the second enable() call must have been a no-op: only the first
        // closure's immediate invocation should have run within 30ms against
        // a 200ms period.
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn panicking_tick_is_recovered_and_reported() {
        let executor = PeriodicExecutor::new();
        executor.enable(Duration::from_millis(10), || panic!("boom")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        executor.disable().await;
        let status = executor.status().await;
        assert!(status.errors.iter().any(|e| e.contains("boom")));
    }
}
