// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SDK-side builder API for named observables. A `Watch` is
//! registered once, under a name stable for the life of the app-run, and
//! sampled by `collectors::watch::WatchCollector` on the variant-specific
//! schedule.
//!
//! Tag parsing follows the `#tag` convention shared with the search DSL:
//! `tags("#slow #db")` splits on whitespace and strips a leading `#`.

use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{RegistrationError, SampleError};

/// Split a tag string like `"#slow #db"` into `["slow", "db"]`.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(|t| t.strip_prefix('#').unwrap_or(t).to_owned()).filter(|t| !t.is_empty()).collect()
}

/// Supported atomic cell kinds for an atomic-polled watch.
#[derive(Clone)]
pub enum AtomicCell {
    Bool(Arc<AtomicBool>),
    I32(Arc<AtomicI32>),
    I64(Arc<AtomicI64>),
    U32(Arc<AtomicU32>),
    U64(Arc<AtomicU64>),
    Usize(Arc<AtomicUsize>),
}

impl AtomicCell {
    pub(crate) fn load(&self) -> serde_json::Value {
        match self {
            Self::Bool(a) => serde_json::json!(a.load(Ordering::SeqCst)),
            Self::I32(a) => serde_json::json!(a.load(Ordering::SeqCst)),
            Self::I64(a) => serde_json::json!(a.load(Ordering::SeqCst)),
            Self::U32(a) => serde_json::json!(a.load(Ordering::SeqCst)),
            Self::U64(a) => serde_json::json!(a.load(Ordering::SeqCst)),
            Self::Usize(a) => serde_json::json!(a.load(Ordering::SeqCst)),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "atomic.Bool",
            Self::I32(_) => "atomic.Int32",
            Self::I64(_) => "atomic.Int64",
            Self::U32(_) => "atomic.Uint32",
            Self::U64(_) => "atomic.Uint64",
            Self::Usize(_) => "atomic.Uintptr",
        }
    }
}

type SampleFn = Box<dyn Fn() -> serde_json::Value + Send + Sync>;

/// A sync-polled sampler takes the lock-wait budget at call time (rather than
/// closing over it) so a caller can retune `lock_timeout` after the watch is
/// built without re-registering it.
type SyncSampleFn = Box<dyn Fn(Duration) -> Result<serde_json::Value, SampleError> + Send + Sync>;

/// Attempt to acquire `mutex` within `timeout`, polling with `try_lock`
/// since `std::sync::Mutex` has no native timed-wait primitive. A poisoned
/// lock is treated the same as an uncontended one: the watch still needs a
/// best-effort read of whatever's there.
fn try_lock_with_timeout<T>(mutex: &Mutex<T>, timeout: Duration) -> Option<MutexGuard<'_, T>> {
    const POLL_INTERVAL: Duration = Duration::from_millis(1);
    let deadline = Instant::now() + timeout;
    loop {
        match mutex.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return None;
                }
                std::thread::sleep(remaining.min(POLL_INTERVAL));
            }
        }
    }
}

/// How a watch's value is obtained. `Sync` samples `value` under its own
/// lock, bounded by `lock_timeout`; `Func` and `Atomic` never block.
pub enum WatchSource {
    Sync { sample: SyncSampleFn, lock_timeout: Duration },
    Func(SampleFn),
    Atomic(AtomicCell),
    Push,
}

/// One declared watch. `val_type` is filled from `std::any::type_name` at
/// the constructor call site, since Rust has no runtime reflection over the
/// pushed/sampled value the way the original system's language does.
pub struct Watch {
    pub name: String,
    pub tags: Vec<String>,
    pub val_type: String,
    pub fmt: String,
    pub file: String,
    pub line: u32,
    pub source: WatchSource,
    last_pushed: Mutex<Option<serde_json::Value>>,
}

impl Watch {
    /// Sync-polled watch: samples `value` under its own lock on each tick,
    /// giving up after `lock_timeout` (default 500ms, see
    /// [`WatchBuilder::lock_timeout`]) and reporting a sample error instead
    /// of blocking the collector tick indefinitely.
    pub fn sync<T: Serialize + Send + 'static>(
        name: impl Into<String>,
        value: Arc<Mutex<T>>,
    ) -> WatchBuilder {
        let sample: SyncSampleFn = Box::new(move |timeout| match try_lock_with_timeout(&value, timeout) {
            Some(guard) => Ok(serde_json::to_value(&*guard)?),
            None => Err(SampleError::LockTimeout),
        });
        WatchBuilder::new(name, WatchSourceBuild::Sync(sample), std::any::type_name::<T>())
    }

    /// Func-polled watch: `f` is invoked with zero arguments and must return
    /// exactly one value, enforced by Rust's type system (`Fn() -> T`).
    pub fn func<T: Serialize + Send + Sync + 'static>(
        name: impl Into<String>,
        f: impl Fn() -> T + Send + Sync + 'static,
    ) -> WatchBuilder {
        let sample: SampleFn = Box::new(move || serde_json::to_value(f()).unwrap_or(serde_json::Value::Null));
        WatchBuilder::new(name, WatchSourceBuild::Func(sample), std::any::type_name::<T>())
    }

    /// Atomic-polled watch: loaded without blocking.
    pub fn atomic(name: impl Into<String>, cell: AtomicCell) -> WatchBuilder {
        let type_name = cell.type_name();
        WatchBuilder::new(name, WatchSourceBuild::Atomic(cell), type_name)
    }

    /// Push watch: the collector never polls; the caller supplies each
    /// sample via [`Watch::push_value`].
    pub fn push<T: Serialize + Send + 'static>(name: impl Into<String>) -> WatchBuilder {
        WatchBuilder::new(name, WatchSourceBuild::Push, std::any::type_name::<T>())
    }

    /// Supply a new value for a push-variant watch. No-op for other
    /// variants, which are sampled on their own schedule instead.
    pub fn push_value(&self, value: impl Serialize) {
        if matches!(self.source, WatchSource::Push) {
            *self.last_pushed.lock().unwrap_or_else(|p| p.into_inner()) =
                Some(serde_json::to_value(value).unwrap_or(serde_json::Value::Null));
        }
    }

    pub(crate) fn take_pushed(&self) -> Option<serde_json::Value> {
        self.last_pushed.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

enum WatchSourceBuild {
    Sync(SyncSampleFn),
    Func(SampleFn),
    Atomic(AtomicCell),
    Push,
}

/// Fluent builder returned by `Watch::{sync,func,atomic,push}`.
pub struct WatchBuilder {
    name: String,
    tags: Vec<String>,
    fmt: String,
    file: String,
    line: u32,
    val_type: String,
    source: WatchSourceBuild,
    sync_lock_timeout: Duration,
}

impl WatchBuilder {
    fn new(name: impl Into<String>, source: WatchSourceBuild, val_type: &'static str) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            fmt: String::new(),
            file: String::new(),
            line: 0,
            val_type: val_type.to_owned(),
            source,
            sync_lock_timeout: Duration::from_millis(500),
        }
    }

    /// Parse `"#tag #tag2"` into the watch's tag list.
    pub fn tags(mut self, raw: &str) -> Self {
        self.tags = parse_tags(raw);
        self
    }

    pub fn fmt(mut self, fmt: impl Into<String>) -> Self {
        self.fmt = fmt.into();
        self
    }

    /// Declaration site, normally filled in by a macro wrapper at the call
    /// site rather than by hand.
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = file.into();
        self.line = line;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.sync_lock_timeout = timeout;
        self
    }

    /// Finish building the watch. The only variant that can still fail
    /// registration is `Push`, if a caller mismatches the declared type
    /// against what gets pushed later; we validate type identity lazily at
    /// push time instead; `build` itself cannot fail today, but returns
    /// `Result` so call sites don't need to change if a future variant adds
    /// eager validation.
    pub fn build(self) -> Result<Watch, RegistrationError> {
        let source = match self.source {
            WatchSourceBuild::Sync(sample) => WatchSource::Sync { sample, lock_timeout: self.sync_lock_timeout },
            WatchSourceBuild::Func(sample) => WatchSource::Func(sample),
            WatchSourceBuild::Atomic(cell) => WatchSource::Atomic(cell),
            WatchSourceBuild::Push => WatchSource::Push,
        };
        Ok(Watch {
            name: self.name,
            tags: self.tags,
            val_type: self.val_type,
            fmt: self.fmt,
            file: self.file,
            line: self.line,
            source,
            last_pushed: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tags_strips_hash_and_splits_on_whitespace() {
        assert_eq!(parse_tags("#slow #db"), vec!["slow".to_owned(), "db".to_owned()]);
        assert_eq!(parse_tags(""), Vec::<String>::new());
    }

    #[test]
    fn func_watch_builds_with_type_name() {
        let watch = Watch::func("counter", || 42i64).build().unwrap();
        assert_eq!(watch.name, "counter");
        assert!(watch.val_type.contains("i64"));
    }

    #[test]
    fn sync_watch_samples_current_value() {
        let value = Arc::new(Mutex::new(vec![1, 2, 3]));
        let watch = Watch::sync("list", Arc::clone(&value)).build().unwrap();
        match &watch.source {
            WatchSource::Sync { sample, lock_timeout } => {
                assert_eq!(sample(*lock_timeout).unwrap(), serde_json::json!([1, 2, 3]))
            }
            _ => panic!("expected sync source"),
        }
    }

    #[test]
    fn sync_watch_times_out_instead_of_blocking_on_a_held_lock() {
        let value = Arc::new(Mutex::new(0i32));
        let watch = Watch::sync("n", Arc::clone(&value)).lock_timeout(Duration::from_millis(20)).build().unwrap();
        let _guard = value.lock().unwrap();

        match &watch.source {
            WatchSource::Sync { sample, lock_timeout } => {
                let err = sample(*lock_timeout).unwrap_err();
                assert!(matches!(err, SampleError::LockTimeout));
            }
            _ => panic!("expected sync source"),
        }
    }

    #[test]
    fn push_watch_records_latest_value_only() {
        let watch = Watch::push::<i64>("gauge").build().unwrap();
        watch.push_value(1i64);
        watch.push_value(2i64);
        assert_eq!(watch.take_pushed(), Some(serde_json::json!(2)));
        assert_eq!(watch.take_pushed(), None);
    }

    #[test]
    fn atomic_watch_loads_current_value() {
        let cell = AtomicCell::I64(Arc::new(AtomicI64::new(7)));
        let watch = Watch::atomic("n", cell).build().unwrap();
        match &watch.source {
            WatchSource::Atomic(cell) => assert_eq!(cell.load(), serde_json::json!(7)),
            _ => panic!("expected atomic source"),
        }
    }
}
