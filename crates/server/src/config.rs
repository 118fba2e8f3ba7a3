// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server startup configuration: listen addresses, idle-widget reaping, and
//! logging knobs, all settable by flag or environment variable.

/// Configuration for the `outrig-server` collector/indexer process.
#[derive(Debug, Clone, clap::Parser)]
pub struct ServerConfig {
    /// Host to bind the HTTP/WebSocket gateway on. Loopback-only by default;
    /// there is no auth layer to protect a wider bind.
    #[arg(long, default_value = "127.0.0.1", env = "OUTRIG_HOST")]
    pub host: String,

    /// Port for the HTTP/WebSocket gateway.
    #[arg(long, default_value_t = 5006, env = "OUTRIG_PORT")]
    pub port: u16,

    /// Unix domain socket path for SDK `packet`/`log` connections. `"-"`
    /// disables the domain socket listener.
    #[arg(long, default_value = "/tmp/outrig.sock", env = "OUTRIG_DOMAINSOCKET")]
    pub domain_socket_path: String,

    /// Loopback TCP port for SDK connections when the domain socket is
    /// unavailable (default `127.0.0.1:5005`). `"-"` disables the TCP
    /// listener.
    #[arg(long, default_value = "5005", env = "OUTRIG_TCPADDR")]
    pub tcp_addr: String,

    /// Idle widget expiry in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "OUTRIG_WIDGET_IDLE_MS")]
    pub widget_idle_ms: u64,

    /// Interval in milliseconds between idle-widget reaper sweeps.
    #[arg(long, default_value_t = 10_000, env = "OUTRIG_REAPER_INTERVAL_MS")]
    pub reaper_interval_ms: u64,

    /// Log format (json or text).
    #[arg(long, default_value = "json", env = "OUTRIG_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "OUTRIG_LOG_LEVEL")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reaper_interval_ms)
    }

    /// `None` means the domain socket listener is disabled (the `"-"`
    /// convention).
    pub fn domain_socket(&self) -> Option<&str> {
        if self.domain_socket_path == "-" {
            None
        } else {
            Some(&self.domain_socket_path)
        }
    }

    /// `None` means the TCP listener is disabled.
    pub fn tcp_port(&self) -> Option<u16> {
        if self.tcp_addr == "-" {
            None
        } else {
            self.tcp_addr.parse().ok()
        }
    }
}
