// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External log-capture wrapper. Spawns the given command as a child
//! process, captures its stdout/stderr pipes, and ships them to the server
//! as `log` packets over its own transport connection.
//!
//! Used in two situations: when `OUTRIG_EXTERNALLOGCAPTURE` asks the SDK to
//! avoid fd interposition inside the monitored process itself, and as the
//! Windows fallback, since fd interposition is Unix-only.
//!
//! `OUTRIG_APPRUNID` (set by the SDK before spawning this wrapper) lets the
//! captured log lines attach to the app-run the primary SDK connection
//! already created, rather than opening a second one.

use std::process::Stdio;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use outrig_sdk::config::Config;
use outrig_sdk::packet::{AppInfoPacket, BuildInfo, LogLine};
use outrig_sdk::transport::{ConnectTargets, Transport};

#[derive(Parser, Debug)]
#[command(name = "outrig-logwrap", about = "Run a command, capturing its stdout/stderr as Outrig log lines.")]
struct Args {
    /// Command and arguments to run.
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    if config.is_disabled() {
        warn!("outrig is disabled, running command without log capture");
        exec_passthrough(&args.command).await;
        return;
    }

    let apprun_id = std::env::var("OUTRIG_APPRUNID").ok().and_then(|s| Uuid::parse_str(&s).ok()).unwrap_or_else(Uuid::new_v4);

    let targets = ConnectTargets {
        domain_socket: config.resolved_domain_socket(),
        tcp_addr: config.resolved_tcp_addr(),
        docker_probe_addr: config.docker_probe_addr(),
    };
    let appinfo = AppInfoPacket {
        apprunid: apprun_id,
        appname: args.command.first().cloned().unwrap_or_default(),
        modulename: config.effective_module_name(),
        executable: args.command.first().cloned().unwrap_or_default(),
        args: args.command.clone(),
        env: Vec::new(),
        starttime: outrig_sdk::packet::now_unix_millis(),
        pid: i64::from(std::process::id()),
        user: std::env::var("USER").unwrap_or_default(),
        hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into()),
        buildinfo: BuildInfo::default(),
        outrigsdkversion: env!("CARGO_PKG_VERSION").to_owned(),
    };

    let shutdown = CancellationToken::new();
    let transport = Transport::spawn(targets, apprun_id, appinfo, shutdown.clone(), config.quiet);

    let wrap_stdout = !config.log_processor.enabled || config.log_processor.wrap_stdout;
    let wrap_stderr = !config.log_processor.enabled || config.log_processor.wrap_stderr;

    let mut child = match Command::new(&args.command[0])
        .args(&args.command[1..])
        .args(&config.log_processor.additional_args)
        .stdout(if wrap_stdout { Stdio::piped() } else { Stdio::inherit() })
        .stderr(if wrap_stderr { Stdio::piped() } else { Stdio::inherit() })
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            error!(%err, "failed to spawn wrapped command");
            std::process::exit(1);
        }
    };

    let linenum = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));
    let out_task = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(pump_lines(stdout, transport.clone(), std::sync::Arc::clone(&linenum), "/dev/stdout")));
    let err_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(pump_lines(stderr, transport.clone(), std::sync::Arc::clone(&linenum), "/dev/stderr")));

    let status = child.wait().await;
    if let Some(out_task) = out_task {
        let _ = out_task.await;
    }
    if let Some(err_task) = err_task {
        let _ = err_task.await;
    }
    shutdown.cancel();

    match status {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(err) => {
            error!(%err, "failed to wait on wrapped command");
            std::process::exit(1);
        }
    }
}

async fn pump_lines<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    transport: Transport,
    linenum: std::sync::Arc<std::sync::atomic::AtomicI64>,
    source: &'static str,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(text)) => {
                let line = LogLine {
                    linenum: linenum.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1,
                    ts: outrig_sdk::packet::now_unix_millis(),
                    msg: text,
                    source: source.to_owned(),
                };
                if let Err(err) = transport.send("log", line) {
                    warn!(%err, source, "failed to enqueue wrapped log line");
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%err, source, "failed reading wrapped command output");
                break;
            }
        }
    }
}

async fn exec_passthrough(command: &[String]) {
    let status = Command::new(&command[0]).args(&command[1..]).status().await;
    match status {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(err) => {
            error!(%err, "failed to spawn wrapped command");
            std::process::exit(1);
        }
    }
}
