// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watch collector: periodically samples every registered
//! [`crate::watch::Watch`] and pushes a `watch` packet carrying deltas,
//! declarations for newly-seen watches, and accumulated registration
//! errors.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::collectors::periodic::{CollectorStatus, PeriodicExecutor};
use crate::collectors::Collector;
use crate::error::RegistrationError;
use crate::packet::{now_unix_millis, RegErrorWire, WatchDeclWire, WatchPacket, WatchSampleWire};
use crate::transport::Transport;
use crate::watch::{Watch, WatchSource};

const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Holds every watch declared for the life of the app-run. Registration is
/// append-only; re-registering a name already present is a registration
/// error rather than a silent replace ("Validation at
/// registration time").
#[derive(Default)]
pub struct WatchRegistry {
    watches: Mutex<Vec<Arc<Watch>>>,
    regerrors: Mutex<Vec<(String, RegistrationError, u32)>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, watch: Watch) -> Result<(), RegistrationError> {
        let mut watches = self.watches.lock().unwrap_or_else(|p| p.into_inner());
        if watches.iter().any(|w| w.name == watch.name) {
            let err = RegistrationError::DuplicateName(watch.name.clone());
            self.regerrors.lock().unwrap_or_else(|p| p.into_inner()).push((
                watch.name.clone(),
                err.clone(),
                watch.line,
            ));
            return Err(err);
        }
        watches.push(Arc::new(watch));
        Ok(())
    }

    fn snapshot(&self) -> Vec<Arc<Watch>> {
        self.watches.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn drain_regerrors(&self) -> Vec<(String, RegistrationError, u32)> {
        std::mem::take(&mut *self.regerrors.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

fn kind_str(source: &WatchSource) -> &'static str {
    match source {
        WatchSource::Sync { .. } => "sync",
        WatchSource::Func(_) => "func",
        WatchSource::Atomic(_) => "atomic",
        WatchSource::Push => "push",
    }
}

fn sample_one(watch: &Watch) -> (String, Option<i64>, Option<String>, Duration) {
    let started = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| match &watch.source {
        WatchSource::Sync { sample, lock_timeout } => sample(*lock_timeout),
        WatchSource::Func(sample) => Ok(sample()),
        WatchSource::Atomic(cell) => Ok(cell.load()),
        WatchSource::Push => Ok(watch.take_pushed().unwrap_or(serde_json::Value::Null)),
    }));

    match result {
        Ok(Ok(value)) => {
            let len = value.as_array().map(|a| a.len() as i64);
            let text = serde_json::to_string(&value).unwrap_or_else(|_| "null".to_owned());
            (text, len, None, started.elapsed())
        }
        Ok(Err(sample_err)) => ("null".to_owned(), None, Some(sample_err.to_string()), started.elapsed()),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_owned());
            ("null".to_owned(), None, Some(msg), started.elapsed())
        }
    }
}

/// Periodically samples [`WatchRegistry`] and emits `watch` packets.
/// Declarations are sent once per watch name; subsequent
/// samples mark `same: true` when the serialized value is unchanged from
/// the previous tick ("same-encoding").
pub struct WatchCollector {
    registry: Arc<WatchRegistry>,
    transport: Transport,
    executor: PeriodicExecutor,
    period: Duration,
    declared: Mutex<std::collections::HashSet<String>>,
    last_values: Mutex<HashMap<String, String>>,
}

impl WatchCollector {
    pub fn new(registry: Arc<WatchRegistry>, transport: Transport) -> Self {
        Self {
            registry,
            transport,
            executor: PeriodicExecutor::new(),
            period: DEFAULT_PERIOD,
            declared: Mutex::new(std::collections::HashSet::new()),
            last_values: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub async fn status(&self) -> CollectorStatus {
        self.executor.status().await
    }

    fn tick(registry: &Arc<WatchRegistry>, transport: &Transport, declared: &Mutex<std::collections::HashSet<String>>, last_values: &Mutex<HashMap<String, String>>) {
        let watches = registry.snapshot();
        let mut decls = Vec::new();
        let mut samples = Vec::with_capacity(watches.len());

        {
            let mut declared = declared.lock().unwrap_or_else(|p| p.into_inner());
            for watch in &watches {
                if declared.insert(watch.name.clone()) {
                    decls.push(WatchDeclWire {
                        name: watch.name.clone(),
                        tags: watch.tags.clone(),
                        ty: watch.val_type.clone(),
                        fmt: watch.fmt.clone(),
                        file: watch.file.clone(),
                        line: i64::from(watch.line),
                    });
                }
            }
        }

        let mut last_values = last_values.lock().unwrap_or_else(|p| p.into_inner());
        for watch in &watches {
            let (text, len, error, poll_dur) = sample_one(watch);
            let same = last_values.get(&watch.name).is_some_and(|prev| prev == &text);
            last_values.insert(watch.name.clone(), text.clone());

            samples.push(WatchSampleWire {
                name: watch.name.clone(),
                same,
                kind: kind_str(&watch.source).to_owned(),
                ty: watch.val_type.clone(),
                val: text,
                error,
                addr: Vec::new(),
                len,
                cap: None,
                fmt: watch.fmt.clone(),
                polldur: poll_dur.as_millis() as i64,
                ts: now_unix_millis(),
            });
        }

        let regerrors = registry
            .drain_regerrors()
            .into_iter()
            .map(|(name, err, line)| RegErrorWire { reference: name, error: err.to_string(), line: i64::from(line) })
            .collect();

        let packet = WatchPacket { ts: now_unix_millis(), delta: true, decls, watches: samples, regerrors };
        if let Err(err) = transport.send("watch", packet) {
            warn!(%err, "failed to enqueue watch packet");
        }
    }
}

#[async_trait::async_trait]
impl Collector for WatchCollector {
    fn name(&self) -> &'static str {
        "watch"
    }

    async fn enable(&self) {
        let registry = Arc::clone(&self.registry);
        let transport = self.transport.clone();
        let declared = Arc::new(Mutex::new(std::collections::HashSet::new()));
        let last_values = Arc::new(Mutex::new(HashMap::new()));
        self.executor
            .enable(self.period, move || {
                Self::tick(&registry, &transport, &declared, &last_values);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use tokio_util::sync::CancellationToken;

    fn transport_pair() -> (Transport, tokio::net::UnixListener, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let targets = crate::transport::ConnectTargets {
            domain_socket: Some(path.to_string_lossy().into_owned()),
            tcp_addr: None,
            docker_probe_addr: None,
        };
        let transport = Transport::spawn(
            targets,
            uuid::Uuid::new_v4(),
            crate::packet::AppInfoPacket {
                apprunid: uuid::Uuid::new_v4(),
                appname: "t".into(),
                modulename: String::new(),
                executable: String::new(),
                args: Vec::new(),
                env: Vec::new(),
                starttime: 0,
                pid: 1,
                user: String::new(),
                hostname: String::new(),
                buildinfo: crate::packet::BuildInfo::default(),
                outrigsdkversion: String::new(),
            },
            CancellationToken::new(),
            false,
        );
        (transport, listener, dir)
    }

    #[test]
    fn sample_one_reports_lock_timeout_as_sample_error() {
        let value = Arc::new(Mutex::new(1i32));
        let watch = Watch::sync("blocked", Arc::clone(&value)).lock_timeout(Duration::from_millis(10)).build().unwrap();
        let _guard = value.lock().unwrap();

        let (text, len, error, _poll_dur) = sample_one(&watch);
        assert_eq!(text, "null");
        assert_eq!(len, None);
        assert_eq!(error.as_deref(), Some("timeout waiting for lock"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = WatchRegistry::new();
        registry.register(Watch::atomic("n", crate::watch::AtomicCell::I64(Arc::new(AtomicI64::new(1)))).build().unwrap()).unwrap();
        let err = registry.register(Watch::atomic("n", crate::watch::AtomicCell::I64(Arc::new(AtomicI64::new(2)))).build().unwrap());
        assert!(matches!(err, Err(RegistrationError::DuplicateName(_))));
    }

    #[tokio::test]
    async fn tick_marks_unchanged_atomic_sample_as_same() {
        let (transport, listener, _dir) = transport_pair();
        let (mut stream, _) = listener.accept().await.unwrap();
        let registry = Arc::new(WatchRegistry::new());
        registry
            .register(Watch::atomic("counter", crate::watch::AtomicCell::I64(Arc::new(AtomicI64::new(5)))).build().unwrap())
            .unwrap();

        let declared = Mutex::new(std::collections::HashSet::new());
        let last_values = Mutex::new(HashMap::new());
        WatchCollector::tick(&registry, &transport, &declared, &last_values);
        WatchCollector::tick(&registry, &transport, &declared, &last_values);

        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut reader = BufReader::new(&mut stream);
        let mut header = String::new();
        reader.read_line(&mut header).await.unwrap();
        let mut appinfo = String::new();
        reader.read_line(&mut appinfo).await.unwrap();

        let mut first = String::new();
        reader.read_line(&mut first).await.unwrap();
        let first: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(first["data"]["watches"][0]["same"], false);

        let mut second = String::new();
        reader.read_line(&mut second).await.unwrap();
        let second: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(second["data"]["watches"][0]["same"], true);
        assert_eq!(second["data"]["decls"].as_array().unwrap().len(), 0);
    }
}
