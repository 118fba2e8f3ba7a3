// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `AppRunPeer`: all server-side state for one app-run, guarded by a single
//! `RwLock` rather than one lock per field — see DESIGN.md for the
//! rationale.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::warn;

use crate::ringbuffer::RingBuffer;

use super::types::*;

const LOG_CAPACITY: usize = 10_000;
const GOROUTINE_HISTORY_CAPACITY: usize = 50;
const WATCH_HISTORY_CAPACITY: usize = 50;
const RUNTIME_STATS_CAPACITY: usize = 600;
const LOG_BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum IngestError {
    /// Packet arrived after `appdone`: subsequent packets are rejected.
    Terminal,
    /// Malformed packet body; caller should log + drop, not tear down the
    /// connection ("protocol violations").
    Malformed(String),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminal => write!(f, "app-run already terminal"),
            Self::Malformed(msg) => write!(f, "malformed packet: {msg}"),
        }
    }
}

impl std::error::Error for IngestError {}

struct PeerState {
    app_name: String,
    module_name: String,
    executable: String,
    args: Vec<String>,
    env: Vec<String>,
    user: String,
    hostname: String,
    build_info: BuildInfo,
    outrig_sdk_version: String,
    pid: i64,
    start_time: i64,
    last_mod_time: i64,
    status: AppRunStatus,
    logs: RingBuffer<Arc<LogLine>>,
    goroutines: HashMap<i64, GoRoutineEntry>,
    watches: HashMap<String, WatchEntry>,
    next_watch_num: i64,
    runtime_stats: RingBuffer<RuntimeStatsSample>,
}

impl PeerState {
    fn from_appinfo(info: AppInfoPacket, now_ms: i64) -> Self {
        Self {
            app_name: info.appname,
            module_name: info.modulename,
            executable: info.executable,
            args: info.args,
            env: info.env,
            user: info.user,
            hostname: info.hostname,
            build_info: info.buildinfo,
            outrig_sdk_version: info.outrigsdkversion,
            pid: info.pid,
            start_time: if info.starttime != 0 { info.starttime } else { now_ms },
            last_mod_time: now_ms,
            status: AppRunStatus::Running,
            logs: RingBuffer::new(LOG_CAPACITY),
            goroutines: HashMap::new(),
            watches: HashMap::new(),
            next_watch_num: 1,
            runtime_stats: RingBuffer::new(RUNTIME_STATS_CAPACITY),
        }
    }
}

/// Per-app-run server state. One instance per distinct
/// `AppRunId`, held by `apprun::registry::AppRunRegistry`.
pub struct AppRunPeer {
    pub app_run_id: AppRunId,
    state: RwLock<PeerState>,
    /// Fan-out of freshly ingested log lines to attached
    /// `search::manager::SearchManager` streaming subscriptions.
    pub log_tx: broadcast::Sender<Arc<LogLine>>,
}

impl AppRunPeer {
    pub fn new(app_run_id: AppRunId, info: AppInfoPacket, now_ms: i64) -> Self {
        let (log_tx, _) = broadcast::channel(LOG_BROADCAST_CAPACITY);
        Self { app_run_id, state: RwLock::new(PeerState::from_appinfo(info, now_ms)), log_tx }
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<Arc<LogLine>> {
        self.log_tx.subscribe()
    }

    pub async fn status(&self) -> AppRunStatus {
        self.state.read().await.status
    }

    pub async fn last_mod_time(&self) -> i64 {
        self.state.read().await.last_mod_time
    }

    pub async fn info_snapshot(&self) -> AppRunInfo {
        let s = self.state.read().await;
        AppRunInfo {
            app_run_id: self.app_run_id,
            app_name: s.app_name.clone(),
            module_name: s.module_name.clone(),
            pid: s.pid,
            executable: s.executable.clone(),
            args: s.args.clone(),
            user: s.user.clone(),
            hostname: s.hostname.clone(),
            start_time: s.start_time,
            last_mod_time: s.last_mod_time,
            status: s.status,
            outrig_sdk_version: s.outrig_sdk_version.clone(),
        }
    }

    /// `appinfo`: first-ever packet initializes identity; a later one (after
    /// a `disconnected` transition) is a reconnection — overwrite metadata
    /// and return to `running`.
    pub async fn ingest_appinfo(&self, info: AppInfoPacket, now_ms: i64) -> Result<(), IngestError> {
        let mut s = self.state.write().await;
        if s.status == AppRunStatus::Done {
            return Err(IngestError::Terminal);
        }
        s.app_name = info.appname;
        s.module_name = info.modulename;
        s.executable = info.executable;
        s.args = info.args;
        s.env = info.env;
        s.user = info.user;
        s.hostname = info.hostname;
        s.build_info = info.buildinfo;
        s.outrig_sdk_version = info.outrigsdkversion;
        s.pid = info.pid;
        s.status = AppRunStatus::Running;
        s.last_mod_time = s.last_mod_time.max(now_ms);
        Ok(())
    }

    pub async fn ingest_log(&self, line: LogLine) -> Result<(), IngestError> {
        self.ingest_multilog(vec![line]).await
    }

    pub async fn ingest_multilog(&self, lines: Vec<LogLine>) -> Result<(), IngestError> {
        let mut s = self.state.write().await;
        if s.status == AppRunStatus::Done {
            return Err(IngestError::Terminal);
        }
        for line in lines {
            s.last_mod_time = s.last_mod_time.max(line.ts);
            let line = Arc::new(line);
            s.logs.push(Arc::clone(&line));
            // Best-effort: no subscribers is not an error.
            let _ = self.log_tx.send(line);
        }
        Ok(())
    }

    /// `goroutine`: merge incoming stacks, carrying forward bodies for
    /// `Same` entries, and run the active/alive/dead state machine on a
    /// non-delta snapshot.
    pub async fn ingest_goroutine(&self, pkt: GoRoutinePacket) -> Result<(), IngestError> {
        let mut s = self.state.write().await;
        if s.status == AppRunStatus::Done {
            return Err(IngestError::Terminal);
        }
        s.last_mod_time = s.last_mod_time.max(pkt.ts);

        for decl in &pkt.decls {
            let entry = s.goroutines.entry(decl.goid).or_insert_with(|| GoRoutineEntry {
                go_id: decl.goid,
                name: decl.name.clone(),
                tags: decl.tags.clone(),
                created_by_package: decl.pkg.clone(),
                created_by_func: decl.func.clone(),
                parent_go_id: decl.parentgoid,
                first_seen_ts: pkt.ts,
                last_seen_ts: pkt.ts,
                missed_samples: 0,
                end_ts: None,
                history: RingBuffer::new(GOROUTINE_HISTORY_CAPACITY),
            });
            entry.name = decl.name.clone();
            entry.tags = decl.tags.clone();
            entry.created_by_package = decl.pkg.clone();
            entry.created_by_func = decl.func.clone();
            entry.parent_go_id = decl.parentgoid;
        }

        let mut seen = std::collections::HashSet::new();
        for stack in &pkt.stacks {
            seen.insert(stack.goid);
            let carried_forward_trace = if stack.same {
                s.goroutines.get(&stack.goid).and_then(|e| e.history.last()).map(|h| h.stack_trace.clone())
            } else {
                None
            };

            let entry = s.goroutines.entry(stack.goid).or_insert_with(|| GoRoutineEntry {
                go_id: stack.goid,
                name: stack.name.clone().unwrap_or_default(),
                tags: stack.tags.clone(),
                created_by_package: String::new(),
                created_by_func: String::new(),
                parent_go_id: None,
                first_seen_ts: stack.ts,
                last_seen_ts: stack.ts,
                missed_samples: 0,
                end_ts: None,
                history: RingBuffer::new(GOROUTINE_HISTORY_CAPACITY),
            });

            let trace = if stack.same {
                carried_forward_trace.unwrap_or_default()
            } else {
                stack.stacktrace.clone().unwrap_or_default()
            };
            entry.last_seen_ts = stack.ts;
            entry.missed_samples = 0;
            entry.end_ts = None;
            entry.history.push(GoRoutineStack { ts: stack.ts, state: stack.state.clone(), stack_trace: trace });
        }

        // Non-delta snapshot: a full census, so an entry missing from it has
        // exited since the previous one. Mark it terminated right away, with
        // EndTs pinned to this tick (the first tick that didn't see it),
        // not to its last_seen_ts, which would report when it was last
        // known-running rather than when it was found gone.
        if !pkt.delta {
            for (goid, entry) in s.goroutines.iter_mut() {
                if !seen.contains(goid) && entry.end_ts.is_none() {
                    entry.missed_samples += 1;
                    entry.end_ts = Some(pkt.ts);
                }
            }
        }

        Ok(())
    }

    /// `watch`: merge declarations, expand `Same` deltas against the
    /// previous sample, accumulate registration errors.
    pub async fn ingest_watch(&self, pkt: WatchPacket) -> Result<(), IngestError> {
        let mut s = self.state.write().await;
        if s.status == AppRunStatus::Done {
            return Err(IngestError::Terminal);
        }
        s.last_mod_time = s.last_mod_time.max(pkt.ts);

        for decl in &pkt.decls {
            let next_num = s.next_watch_num;
            let entry = s.watches.entry(decl.name.clone()).or_insert_with(|| WatchEntry {
                watch_num: next_num,
                name: decl.name.clone(),
                tags: decl.tags.clone(),
                ty: decl.ty.clone(),
                fmt: decl.fmt.clone(),
                file: decl.file.clone(),
                line: decl.line,
                latest: None,
                history: RingBuffer::new(WATCH_HISTORY_CAPACITY),
                reg_errors: Vec::new(),
            });
            if entry.watch_num == next_num {
                s.next_watch_num += 1;
            }
            entry.tags = decl.tags.clone();
            entry.ty = decl.ty.clone();
            entry.fmt = decl.fmt.clone();
            entry.file = decl.file.clone();
            entry.line = decl.line;
        }

        for sample in &pkt.watches {
            let next_num = s.next_watch_num;
            let entry = s.watches.entry(sample.name.clone()).or_insert_with(|| WatchEntry {
                watch_num: next_num,
                name: sample.name.clone(),
                tags: Vec::new(),
                ty: sample.ty.clone(),
                fmt: sample.fmt.clone(),
                file: String::new(),
                line: 0,
                latest: None,
                history: RingBuffer::new(WATCH_HISTORY_CAPACITY),
                reg_errors: Vec::new(),
            });
            if entry.watch_num == next_num {
                s.next_watch_num += 1;
            }

            let materialized = if sample.same {
                entry.latest.clone().unwrap_or(WatchSample {
                    kind: sample.kind.clone(),
                    ty: sample.ty.clone(),
                    val: sample.val.clone(),
                    error: sample.error.clone(),
                    addr: sample.addr.clone(),
                    len: sample.len,
                    cap: sample.cap,
                    fmt: sample.fmt.clone(),
                    poll_dur: sample.polldur,
                    ts: sample.ts,
                })
            } else {
                WatchSample {
                    kind: sample.kind.clone(),
                    ty: sample.ty.clone(),
                    val: sample.val.clone(),
                    error: sample.error.clone(),
                    addr: sample.addr.clone(),
                    len: sample.len,
                    cap: sample.cap,
                    fmt: sample.fmt.clone(),
                    poll_dur: sample.polldur,
                    ts: sample.ts,
                }
            };
            entry.history.push(materialized.clone());
            entry.latest = Some(materialized);
        }

        for reg_err in pkt.regerrors {
            if let Some(entry) = s.watches.get_mut(&reg_err.reference) {
                entry.reg_errors.push(reg_err);
            } else {
                warn!(reference = %reg_err.reference, "watch registration error for unknown watch");
            }
        }

        Ok(())
    }

    pub async fn ingest_runtimestats(&self, sample: RuntimeStatsSample) -> Result<(), IngestError> {
        let mut s = self.state.write().await;
        if s.status == AppRunStatus::Done {
            return Err(IngestError::Terminal);
        }
        s.last_mod_time = s.last_mod_time.max(sample.ts);
        s.runtime_stats.push(sample);
        Ok(())
    }

    /// `appdone`: terminal. Subsequent packets are rejected.
    pub async fn ingest_appdone(&self, now_ms: i64) -> Result<(), IngestError> {
        let mut s = self.state.write().await;
        if s.status == AppRunStatus::Done {
            return Err(IngestError::Terminal);
        }
        s.status = AppRunStatus::Done;
        s.last_mod_time = s.last_mod_time.max(now_ms);
        Ok(())
    }

    /// Connection closed without `appdone`.
    pub async fn mark_disconnected(&self) {
        let mut s = self.state.write().await;
        if s.status == AppRunStatus::Running {
            s.status = AppRunStatus::Disconnected;
        }
    }

    pub async fn logs_all(&self) -> Vec<Arc<LogLine>> {
        self.state.read().await.logs.get_all().0
    }

    pub async fn goroutines_snapshot(&self) -> Vec<GoRoutineEntry> {
        self.state.read().await.goroutines.values().cloned().collect()
    }

    pub async fn goroutines_by_ids(&self, ids: &[i64]) -> Vec<GoRoutineEntry> {
        let s = self.state.read().await;
        ids.iter().filter_map(|id| s.goroutines.get(id).cloned()).collect()
    }

    pub async fn watches_snapshot(&self) -> Vec<WatchEntry> {
        self.state.read().await.watches.values().cloned().collect()
    }

    pub async fn watches_by_nums(&self, nums: &[i64]) -> Vec<WatchEntry> {
        let s = self.state.read().await;
        s.watches.values().filter(|w| nums.contains(&w.watch_num)).cloned().collect()
    }

    pub async fn runtime_stats_since(&self, since: i64) -> Vec<RuntimeStatsSample> {
        self.state
            .read()
            .await
            .runtime_stats
            .get_all()
            .0
            .into_iter()
            .filter(|s| s.ts > since)
            .collect()
    }

    pub async fn goroutine_counts(&self) -> (usize, usize) {
        let s = self.state.read().await;
        let total = s.goroutines.len();
        let active = s.goroutines.values().filter(|g| g.is_active()).count();
        (total, active)
    }
}
