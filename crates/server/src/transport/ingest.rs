// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unix-domain-socket and loopback-TCP listeners that accept SDK connections.
//! Each connection announces a small header — `{mode, apprunid}` — then
//! switches to either raw-byte log funneling (`log` mode) or line-delimited
//! JSON ingestion (`packet` mode).
//!
//! Grounded on `transport/ws.rs`'s per-connection task shape (one task per
//! accepted connection, `tokio::select!` over cancellation + read), adapted
//! from WebSocket framing to raw newline-delimited-JSON socket framing.

use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apprun::ingest::{ingest_line, IngestOutcome};
use crate::apprun::AppRunPeer;
use crate::apprun::types::AppRunId;
use crate::state::{epoch_ms, ServerState};

/// First line on every connection: announces which funnel the rest of the
/// byte stream belongs to.
#[derive(Debug, Deserialize)]
struct ConnHeader {
    mode: ConnMode,
    #[serde(default)]
    apprunid: Option<AppRunId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ConnMode {
    Log,
    Packet,
}

/// Bind and serve the domain-socket listener until `cancel` fires. The
/// caller is responsible for removing a stale socket file before binding.
pub async fn serve_unix(path: &str, state: Arc<ServerState>, cancel: CancellationToken) -> std::io::Result<()> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    info!(path, "outrig server listening on unix domain socket");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let state = Arc::clone(&state);
                let cancel = cancel.child_token();
                tokio::spawn(async move {
                    let (r, w) = stream.into_split();
                    handle_connection(r, w, state, cancel).await;
                });
            }
        }
    }
}

/// Bind and serve the loopback TCP listener until `cancel` fires.
pub async fn serve_tcp(host: &str, port: u16, state: Arc<ServerState>, cancel: CancellationToken) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(addr, "outrig server listening on tcp");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let state = Arc::clone(&state);
                let cancel = cancel.child_token();
                tokio::spawn(async move {
                    let (r, w) = stream.into_split();
                    handle_connection(r, w, state, cancel).await;
                });
            }
        }
    }
}

async fn handle_connection<R, W>(reader: R, mut writer: W, state: Arc<ServerState>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    let header = tokio::select! {
        _ = cancel.cancelled() => return,
        line = lines.next_line() => line,
    };
    let header_line = match header {
        Ok(Some(line)) => line,
        Ok(None) => return,
        Err(e) => {
            debug!(err = %e, "connection closed before header");
            return;
        }
    };
    let header: ConnHeader = match serde_json::from_str(&header_line) {
        Ok(h) => h,
        Err(e) => {
            warn!(err = %e, "malformed connection header, dropping connection");
            return;
        }
    };

    match header.mode {
        ConnMode::Log => handle_log_mode(lines, header.apprunid, state, cancel).await,
        ConnMode::Packet => handle_packet_mode(lines, state, cancel).await,
    }

    let _ = writer.shutdown().await;
}

/// `log` mode: every subsequent line is raw stdout/stderr text for the
/// named `AppRunId`, funneled straight into the log pipeline as though it
/// arrived via a `log` packet. Used by the external log-capture child
/// process.
async fn handle_log_mode<R: AsyncRead + Unpin>(
    mut lines: tokio::io::Lines<BufReader<R>>,
    apprunid: Option<AppRunId>,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) {
    let Some(apprunid) = apprunid else {
        warn!("log-mode connection missing apprunid in header");
        return;
    };
    let Some(peer) = state.apprun_registry.get(&apprunid).await else {
        warn!(%apprunid, "log-mode connection for unknown app-run");
        return;
    };
    let mut linenum = 0i64;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(text)) => {
                linenum += 1;
                let _ = peer
                    .ingest_log(crate::apprun::types::LogLine {
                        linenum,
                        ts: epoch_ms() as i64,
                        msg: text,
                        source: "/dev/stdout".to_owned(),
                    })
                    .await;
            }
            Ok(None) => break,
            Err(e) => {
                debug!(err = %e, "log-mode connection read error");
                break;
            }
        }
    }
    peer.mark_disconnected().await;
}

/// `packet` mode: every subsequent line is a `{type, data}` JSON packet
/// dispatched into `AppRunPeer` ingestion. On EOF or error the
/// peer (if any was established) is marked disconnected — `appdone` was
/// never received.
async fn handle_packet_mode<R: AsyncRead + Unpin>(
    mut lines: tokio::io::Lines<BufReader<R>>,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) {
    let mut current_peer: Option<Arc<AppRunPeer>> = None;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(text)) => {
                if text.trim().is_empty() {
                    continue;
                }
                let now_ms = epoch_ms() as i64;
                let outcome = ingest_line(&state.apprun_registry, &mut current_peer, &text, now_ms).await;
                if let IngestOutcome::Dropped(reason) = outcome {
                    debug!(reason, "dropped malformed or rejected packet");
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(err = %e, "packet-mode connection read error");
                break;
            }
        }
    }
    if let Some(peer) = current_peer {
        peer.mark_disconnected().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn packet_mode_ingests_appinfo_then_log_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let state = Arc::new(ServerState::new());
        let cancel = CancellationToken::new();

        let serve_cancel = cancel.clone();
        let serve_state = Arc::clone(&state);
        let path_str = path.to_str().unwrap().to_owned();
        let server = tokio::spawn(async move {
            let _ = serve_unix(&path_str, serve_state, serve_cancel).await;
        });

        // Give the listener a moment to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let id = uuid::Uuid::new_v4();
        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"{\"mode\":\"packet\"}\n").await.unwrap();
        let appinfo = format!("{{\"type\":\"appinfo\",\"data\":{{\"apprunid\":\"{id}\",\"appname\":\"x\",\"pid\":1}}}}\n");
        stream.write_all(appinfo.as_bytes()).await.unwrap();
        stream.write_all(b"{\"type\":\"log\",\"data\":{\"linenum\":1,\"ts\":1000,\"msg\":\"hello\"}}\n").await.unwrap();
        stream.flush().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(peer) = state.apprun_registry.get(&id).await {
                    if !peer.logs_all().await.is_empty() {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let peer = state.apprun_registry.get(&id).await.unwrap();
        let logs = peer.logs_all().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].msg, "hello");

        cancel.cancel();
        let _ = server.await;
    }
}
