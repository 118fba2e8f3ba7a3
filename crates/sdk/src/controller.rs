// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SDK lifecycle orchestration: wires [`Config`] into a
//! [`Transport`], a [`CollectorRegistry`], and the watch/goroutine
//! registries a monitored program's code interacts with directly.
//!
//! One `init()` call builds every subsystem and returns a handle the caller
//! keeps alive for the process lifetime; a background task reacts to
//! transport connect/disconnect by flipping collectors on and off.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::collectors::goroutine::{GoroutineCollector, GoroutineRegistry};
use crate::collectors::logcapture::LogCaptureCollector;
use crate::collectors::runtimestats::RuntimeStatsCollector;
use crate::collectors::watch::{WatchCollector, WatchRegistry};
use crate::collectors::CollectorRegistry;
use crate::config::Config;
use crate::packet::{AppInfoPacket, BuildInfo};
use crate::transport::{ConnectTargets, Transport};
use crate::watch::Watch;

/// Bound on the synchronous wait `ConnectOnInit` performs before `init`
/// returns control to the caller. Past this the connect loop
/// keeps retrying in the background as usual; `init` just stops waiting.
const CONNECT_ON_INIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Live handle to an initialized SDK instance. Dropping it does not tear
/// anything down; call [`Controller::shutdown`] explicitly, or let the
/// process exit ("the SDK outlives ordinary teardown paths since
/// it exists to observe the crash that would otherwise take it with it").
pub struct Controller {
    pub apprun_id: Uuid,
    transport: Transport,
    collectors: Arc<CollectorRegistry>,
    watches: Arc<WatchRegistry>,
    goroutines: Arc<GoroutineRegistry>,
    shutdown: CancellationToken,
}

impl Controller {
    /// Initialize the SDK for the current process.
    /// Returns `None` when the config disables both transports, in which
    /// case every collector-registration call becomes a safe no-op target
    /// for the caller to skip.
    pub async fn init(config: &Config) -> Option<Self> {
        if config.is_disabled() {
            if !config.quiet {
                info!("outrig SDK disabled via configuration, skipping init");
            }
            return None;
        }

        let apprun_id = Uuid::new_v4();
        let targets = ConnectTargets {
            domain_socket: config.resolved_domain_socket(),
            tcp_addr: config.resolved_tcp_addr(),
            docker_probe_addr: config.docker_probe_addr(),
        };
        let appinfo = build_appinfo(apprun_id, config);
        let shutdown = CancellationToken::new();
        let transport = Transport::spawn(targets, apprun_id, appinfo, shutdown.clone(), config.quiet);

        if config.connect_on_init {
            let mut enabled_rx = transport.enabled_rx();
            let _ = tokio::time::timeout(CONNECT_ON_INIT_TIMEOUT, async {
                while !*enabled_rx.borrow_and_update() {
                    if enabled_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;
        }

        let watches = Arc::new(WatchRegistry::new());
        let goroutines = Arc::new(GoroutineRegistry::new());
        let collectors = Arc::new(CollectorRegistry::new());

        if config.collectors.watch_enabled {
            collectors
                .register(Arc::new(WatchCollector::new(Arc::clone(&watches), transport.clone())))
                .await;
        }
        if config.collectors.goroutine_enabled {
            collectors
                .register(Arc::new(GoroutineCollector::new(Arc::clone(&goroutines), transport.clone())))
                .await;
        }
        if config.collectors.runtime_stats_enabled {
            collectors
                .register(Arc::new(RuntimeStatsCollector::new(Arc::clone(&goroutines), transport.clone())))
                .await;
        }
        if !config.log_processor.enabled {
            collectors.register(Arc::new(LogCaptureCollector::new(transport.clone()))).await;
        }

        spawn_enable_on_connect(transport.clone(), Arc::clone(&collectors));

        Some(Self { apprun_id, transport, collectors, watches, goroutines, shutdown })
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn watches(&self) -> &Arc<WatchRegistry> {
        &self.watches
    }

    pub fn goroutines(&self) -> &Arc<GoroutineRegistry> {
        &self.goroutines
    }

    pub fn collectors(&self) -> &Arc<CollectorRegistry> {
        &self.collectors
    }

    /// Register a watch built via [`crate::watch::Watch`]'s builder API.
    pub fn register_watch(&self, watch: crate::watch::Watch) -> Result<(), crate::error::RegistrationError> {
        self.watches.register(watch)
    }

    /// Force-disable every collector and stop the transport, discarding any
    /// queued-but-unsent packets.
    pub async fn shutdown(&self) {
        self.collectors.set_enabled(false).await;
        self.shutdown.cancel();
    }
}

fn build_appinfo(apprun_id: Uuid, config: &Config) -> AppInfoPacket {
    let starttime = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);
    AppInfoPacket {
        apprunid: apprun_id,
        appname: config.effective_module_name(),
        modulename: config.effective_module_name(),
        executable: std::env::current_exe().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
        args: std::env::args().collect(),
        env: Vec::new(),
        starttime,
        pid: i64::from(std::process::id()),
        user: std::env::var("USER").unwrap_or_default(),
        hostname: hostname(),
        buildinfo: BuildInfo::default(),
        outrigsdkversion: env!("CARGO_PKG_VERSION").to_owned(),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned())
}

/// Reacts to the transport's connect/disconnect signal by enabling or
/// disabling every registered collector ("collectors track the
/// transport's connected state").
fn spawn_enable_on_connect(transport: Transport, collectors: Arc<CollectorRegistry>) {
    let mut enabled_rx = transport.enabled_rx();
    tokio::spawn(async move {
        loop {
            let enabled = *enabled_rx.borrow_and_update();
            collectors.set_enabled(enabled).await;
            if enabled_rx.changed().await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_returns_none_when_disabled() {
        let mut config = Config::default();
        config.domain_socket_path = crate::config::AddrOption::Disabled;
        config.tcp_addr = crate::config::AddrOption::Disabled;
        assert!(Controller::init(&config).await.is_none());
    }

    #[tokio::test]
    async fn connect_on_init_blocks_until_the_transport_reports_connected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connect.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let mut config = Config::default();
        config.domain_socket_path = crate::config::AddrOption::Value(path.to_string_lossy().into_owned());
        config.tcp_addr = crate::config::AddrOption::Disabled;
        config.connect_on_init = true;

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let controller = Controller::init(&config).await.unwrap();
        accept.await.unwrap();

        assert!(controller.transport().is_connected());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn connect_on_init_does_not_hang_when_no_server_is_listening() {
        let mut config = Config::default();
        config.domain_socket_path = crate::config::AddrOption::Value("/tmp/outrig-nonexistent.sock".to_owned());
        config.tcp_addr = crate::config::AddrOption::Disabled;
        config.connect_on_init = true;

        let controller =
            tokio::time::timeout(Duration::from_secs(5), Controller::init(&config)).await.unwrap().unwrap();
        assert!(!controller.transport().is_connected());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn init_wires_a_distinct_apprun_id_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let _listener = tokio::net::UnixListener::bind(&path).unwrap();

        let mut config = Config::default();
        config.domain_socket_path = crate::config::AddrOption::Value(path.to_string_lossy().into_owned());
        config.tcp_addr = crate::config::AddrOption::Disabled;

        let a = Controller::init(&config).await.unwrap();
        let b = Controller::init(&config).await.unwrap();
        assert_ne!(a.apprun_id, b.apprun_id);
        a.shutdown().await;
        b.shutdown().await;
    }
}
