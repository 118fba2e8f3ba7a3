// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch a raw `{type, data}` packet to the right
//! `AppRunPeer` handler. Unknown types and malformed bodies are logged and
//! dropped, never torn down the connection ("protocol violations").

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use super::peer::{AppRunPeer, IngestError};
use super::registry::AppRunRegistry;
use super::types::*;

#[derive(Debug, Deserialize)]
pub struct RawPacket {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// The first packet on a connection must be `appinfo`; everything else
/// requires an existing peer.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Applied,
    Dropped(String),
}

/// Ingest one line of a `packet`-mode connection. `now_ms` is the server's
/// receive timestamp, used only as a fallback when a packet omits `ts`.
pub async fn ingest_line(
    registry: &AppRunRegistry,
    current_peer: &mut Option<Arc<AppRunPeer>>,
    line: &str,
    now_ms: i64,
) -> IngestOutcome {
    let raw: RawPacket = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return IngestOutcome::Dropped(format!("invalid packet envelope: {e}")),
    };

    if raw.kind == "appinfo" {
        let info: AppInfoPacket = match serde_json::from_value(raw.data) {
            Ok(i) => i,
            Err(e) => return IngestOutcome::Dropped(format!("invalid appinfo: {e}")),
        };
        let peer = registry.get_or_create(info, now_ms).await;
        *current_peer = Some(peer);
        return IngestOutcome::Applied;
    }

    let Some(peer) = current_peer.as_ref() else {
        warn!(kind = %raw.kind, "packet before appinfo on this connection");
        return IngestOutcome::Dropped("packet received before appinfo".to_owned());
    };

    let result = match raw.kind.as_str() {
        "log" => match serde_json::from_value::<LogLine>(raw.data) {
            Ok(line) => peer.ingest_log(line).await,
            Err(e) => return IngestOutcome::Dropped(format!("invalid log: {e}")),
        },
        "multilog" => match serde_json::from_value::<MultiLogPacket>(raw.data) {
            Ok(pkt) => peer.ingest_multilog(pkt.loglines).await,
            Err(e) => return IngestOutcome::Dropped(format!("invalid multilog: {e}")),
        },
        "goroutine" => match serde_json::from_value::<GoRoutinePacket>(raw.data) {
            Ok(pkt) => peer.ingest_goroutine(pkt).await,
            Err(e) => return IngestOutcome::Dropped(format!("invalid goroutine packet: {e}")),
        },
        "watch" => match serde_json::from_value::<WatchPacket>(raw.data) {
            Ok(pkt) => peer.ingest_watch(pkt).await,
            Err(e) => return IngestOutcome::Dropped(format!("invalid watch packet: {e}")),
        },
        "runtimestats" => match serde_json::from_value::<RuntimeStatsSample>(raw.data) {
            Ok(sample) => peer.ingest_runtimestats(sample).await,
            Err(e) => return IngestOutcome::Dropped(format!("invalid runtimestats packet: {e}")),
        },
        "appdone" => peer.ingest_appdone(now_ms).await,
        "collectorstatus" => {
            // No retained entity for collector self-reports;
            // surfaced only through logs.
            return IngestOutcome::Applied;
        }
        other => {
            warn!(kind = %other, "unknown packet type");
            return IngestOutcome::Dropped(format!("unknown packet type {other}"));
        }
    };

    match result {
        Ok(()) => IngestOutcome::Applied,
        Err(IngestError::Terminal) => IngestOutcome::Dropped("app-run is already terminal".to_owned()),
        Err(IngestError::Malformed(msg)) => IngestOutcome::Dropped(msg),
    }
}
