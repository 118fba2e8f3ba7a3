// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SDK initialization configuration.

use std::env;

/// Default loopback TCP port the server listens on in production.
pub const DEFAULT_TCP_PORT: u16 = 5005;
/// Default loopback TCP port used when `OUTRIG_DEVCONFIG` is set.
pub const DEV_TCP_PORT: u16 = 6005;
/// Default Unix domain socket path.
pub const DEFAULT_DOMAIN_SOCKET: &str = "/tmp/outrig.sock";

/// A configuration value that is either left at its default, set to a
/// concrete value, or explicitly disabled via the `"-"` convention
/// (`DomainSocketPath`/`TcpAddr`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AddrOption {
    #[default]
    Default,
    Value(String),
    Disabled,
}

impl From<&str> for AddrOption {
    fn from(s: &str) -> Self {
        match s {
            "" => Self::Default,
            "-" => Self::Disabled,
            other => Self::Value(other.to_owned()),
        }
    }
}

/// Per-collector kill switches.
#[derive(Debug, Clone)]
pub struct CollectorToggles {
    pub watch_enabled: bool,
    pub goroutine_enabled: bool,
    pub runtime_stats_enabled: bool,
}

impl Default for CollectorToggles {
    fn default() -> Self {
        Self { watch_enabled: true, goroutine_enabled: true, runtime_stats_enabled: true }
    }
}

/// External log-capture process configuration.
#[derive(Debug, Clone, Default)]
pub struct LogProcessorConfig {
    pub enabled: bool,
    pub wrap_stdout: bool,
    pub wrap_stderr: bool,
    pub outrig_path: Option<String>,
    pub additional_args: Vec<String>,
}

/// Top-level SDK init configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub domain_socket_path: AddrOption,
    pub tcp_addr: AddrOption,
    pub disable_docker_probe: bool,
    pub module_name: String,
    pub connect_on_init: bool,
    pub quiet: bool,
    pub log_processor: LogProcessorConfig,
    pub collectors: CollectorToggles,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain_socket_path: AddrOption::Default,
            tcp_addr: AddrOption::Default,
            disable_docker_probe: false,
            module_name: String::new(),
            connect_on_init: false,
            quiet: false,
            log_processor: LogProcessorConfig::default(),
            collectors: CollectorToggles::default(),
        }
    }
}

impl Config {
    /// Build a [`Config`] overlaying environment variables on top of defaults
    /// (`OUTRIG_DOMAINSOCKET`, `OUTRIG_TCPADDR`, `OUTRIG_DISABLED`,
    /// `OUTRIG_DEVCONFIG`, `OUTRIG_EXTERNALLOGCAPTURE`).
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] but sourcing variables from an arbitrary
    /// lookup function, so the overlay logic is testable without mutating
    /// real process environment (which is racy across parallel tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("OUTRIG_DOMAINSOCKET") {
            config.domain_socket_path = AddrOption::from(v.as_str());
        }
        if let Some(v) = lookup("OUTRIG_TCPADDR") {
            config.tcp_addr = AddrOption::from(v.as_str());
        }
        if lookup("OUTRIG_DISABLED").map(|v| is_truthy(&v)).unwrap_or(false) {
            config.domain_socket_path = AddrOption::Disabled;
            config.tcp_addr = AddrOption::Disabled;
        }
        if lookup("OUTRIG_EXTERNALLOGCAPTURE").map(|v| is_truthy(&v)).unwrap_or(false) {
            config.log_processor.enabled = true;
        }

        config
    }

    /// Whether the SDK is disabled entirely (both transports off).
    pub fn is_disabled(&self) -> bool {
        self.domain_socket_path == AddrOption::Disabled && self.tcp_addr == AddrOption::Disabled
    }

    /// Resolve the Unix domain socket path to connect to, or `None` if
    /// disabled.
    pub fn resolved_domain_socket(&self) -> Option<String> {
        match &self.domain_socket_path {
            AddrOption::Default => Some(DEFAULT_DOMAIN_SOCKET.to_owned()),
            AddrOption::Value(v) => Some(v.clone()),
            AddrOption::Disabled => None,
        }
    }

    /// Resolve the TCP address to connect to, or `None` if disabled.
    ///
    /// `OUTRIG_DEVCONFIG` switches the default port from 5005 to 6005.
    pub fn resolved_tcp_addr(&self) -> Option<String> {
        let dev = env::var("OUTRIG_DEVCONFIG").map(|v| is_truthy(&v)).unwrap_or(false);
        self.resolved_tcp_addr_with_dev(dev)
    }

    /// Same as [`Config::resolved_tcp_addr`] with the dev-mode flag passed in
    /// explicitly, so the port-selection logic is testable without mutating
    /// real process environment.
    pub fn resolved_tcp_addr_with_dev(&self, dev: bool) -> Option<String> {
        match &self.tcp_addr {
            AddrOption::Default => {
                let port = if dev { DEV_TCP_PORT } else { DEFAULT_TCP_PORT };
                Some(format!("127.0.0.1:{port}"))
            }
            AddrOption::Value(v) => Some(v.clone()),
            AddrOption::Disabled => None,
        }
    }

    /// `host.docker.internal:<port>` fallback target, tried after the
    /// loopback TCP address fails to connect, so the SDK reaches a
    /// host-bound server from inside a container without configuration.
    /// Suppressed by `DisableDockerProbe`. Only offered when the TCP
    /// target is still the unconfigured default — an explicit `TcpAddr`
    /// means the operator already picked a target.
    pub fn docker_probe_addr(&self) -> Option<String> {
        let dev = env::var("OUTRIG_DEVCONFIG").map(|v| is_truthy(&v)).unwrap_or(false);
        self.docker_probe_addr_with_dev(dev)
    }

    /// Same as [`Config::docker_probe_addr`] with the dev-mode flag passed
    /// in explicitly, for testability.
    pub fn docker_probe_addr_with_dev(&self, dev: bool) -> Option<String> {
        if self.disable_docker_probe || self.tcp_addr != AddrOption::Default {
            return None;
        }
        let port = if dev { DEV_TCP_PORT } else { DEFAULT_TCP_PORT };
        Some(format!("host.docker.internal:{port}"))
    }

    /// Module name to report in `appinfo`, autodetecting from a manifest in
    /// the current directory when left empty.
    pub fn effective_module_name(&self) -> String {
        if !self.module_name.is_empty() {
            return self.module_name.clone();
        }
        detect_module_name().unwrap_or_default()
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim(), "1" | "true" | "TRUE" | "True")
}

/// Best-effort module-name autodetection from the package manifest in the
/// current working directory, used when `ModuleName` is left empty.
fn detect_module_name() -> Option<String> {
    let manifest = std::fs::read_to_string("Cargo.toml").ok()?;
    for line in manifest.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("name") {
            let rest = rest.trim_start();
            if let Some(rest) = rest.strip_prefix('=') {
                let name = rest.trim().trim_matches('"');
                if !name.is_empty() {
                    return Some(name.to_owned());
                }
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
