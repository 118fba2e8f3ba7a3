// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ConnectTargets, ERROR_THRESHOLD, RECONNECT_POLL};
use crate::packet::{AppInfoPacket, Packet};

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum ConnMode {
    Packet,
}

#[derive(Debug, Serialize)]
struct ConnHeader {
    mode: ConnMode,
    apprunid: Uuid,
}

/// Background task body: connect, send header + appinfo, then drain the
/// send queue until a force-reconnect condition or shutdown.
#[allow(clippy::too_many_arguments)]
pub(super) async fn run(
    targets: ConnectTargets,
    apprun_id: Uuid,
    appinfo: AppInfoPacket,
    mut queue_rx: mpsc::Receiver<Vec<u8>>,
    error_count: Arc<AtomicU32>,
    connected: Arc<AtomicBool>,
    enabled_tx: watch::Sender<bool>,
    shutdown: CancellationToken,
    quiet: bool,
) {
    let header = ConnHeader { mode: ConnMode::Packet, apprunid: apprun_id };
    let header_line = match serde_json::to_vec(&header) {
        Ok(mut bytes) => {
            bytes.push(b'\n');
            bytes
        }
        Err(e) => {
            warn!(err = %e, "failed to encode connection header, transport disabled");
            return;
        }
    };
    let appinfo_line = match Packet::new("appinfo", &appinfo).and_then(|p| p.encode_line()) {
        Ok(line) => line.into_bytes(),
        Err(e) => {
            warn!(err = %e, "failed to encode appinfo packet, transport disabled");
            return;
        }
    };

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match dial(&targets).await {
            Some(mut stream) => {
                if let Err(e) = stream.write_all(&header_line).await {
                    debug!(err = %e, "failed writing connection header");
                } else if let Err(e) = stream.write_all(&appinfo_line).await {
                    debug!(err = %e, "failed writing appinfo packet");
                } else {
                    if !quiet {
                        info!("outrig transport connected");
                    }
                    error_count.store(0, Ordering::Relaxed);
                    connected.store(true, Ordering::Relaxed);
                    let _ = enabled_tx.send(true);

                    drain_until_reconnect(&mut stream, &mut queue_rx, &error_count, &shutdown).await;

                    connected.store(false, Ordering::Relaxed);
                    let _ = enabled_tx.send(false);
                    if !quiet {
                        info!("outrig transport disconnected");
                    }
                }
            }
            None => {
                debug!("outrig transport connect failed, will retry");
            }
        }

        if shutdown.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_POLL) => {}
        }
    }
}

/// Attempt Unix domain socket first, then loopback TCP, then the
/// `host.docker.internal` DNS probe.
async fn dial(targets: &ConnectTargets) -> Option<Box<dyn AsyncWrite + Unpin + Send>> {
    if let Some(path) = &targets.domain_socket {
        match UnixStream::connect(path).await {
            Ok(stream) => return Some(Box::new(stream)),
            Err(e) => debug!(err = %e, path, "unix domain socket connect failed"),
        }
    }
    if let Some(addr) = &targets.tcp_addr {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Some(Box::new(stream)),
            Err(e) => debug!(err = %e, addr, "tcp connect failed"),
        }
    }
    if let Some(addr) = &targets.docker_probe_addr {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(addr, "outrig transport connected via host.docker.internal probe");
                return Some(Box::new(stream));
            }
            Err(e) => debug!(err = %e, addr, "docker-internal probe connect failed"),
        }
    }
    None
}

/// Drains the send queue onto the connection until either a write fails, the
/// error counter crosses [`ERROR_THRESHOLD`] on a reconnect poll tick, or
/// shutdown is requested.
async fn drain_until_reconnect(
    stream: &mut (dyn AsyncWrite + Unpin + Send),
    queue_rx: &mut mpsc::Receiver<Vec<u8>>,
    error_count: &Arc<AtomicU32>,
    shutdown: &CancellationToken,
) {
    let mut poll = tokio::time::interval(RECONNECT_POLL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = poll.tick() => {
                if error_count.load(Ordering::Relaxed) >= ERROR_THRESHOLD {
                    warn!("outrig transport forcing reconnect after repeated write failures");
                    return;
                }
            }
            maybe_line = queue_rx.recv() => {
                match maybe_line {
                    Some(line) => {
                        if let Err(e) = stream.write_all(&line).await {
                            debug!(err = %e, "outrig transport write failed");
                            error_count.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}
