// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire packet shapes (SDK → server) and the server-side entities they feed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AppRunId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRunStatus {
    Running,
    Done,
    Disconnected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildInfo {
    #[serde(rename = "goversion", default)]
    pub go_version: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub settings: std::collections::HashMap<String, String>,
}

/// `appinfo` packet body — mandatory first packet on every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfoPacket {
    pub apprunid: AppRunId,
    pub appname: String,
    #[serde(default)]
    pub modulename: String,
    #[serde(default)]
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub starttime: i64,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub buildinfo: BuildInfo,
    #[serde(default)]
    pub outrigsdkversion: String,
}

/// `LogLine` — immutable once pushed into the ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub linenum: i64,
    pub ts: i64,
    pub msg: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "/dev/stdout".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiLogPacket {
    pub loglines: Vec<LogLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoRoutineStackWire {
    pub goid: i64,
    pub ts: i64,
    #[serde(default)]
    pub same: bool,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub stacktrace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoRoutineDeclWire {
    pub goid: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pkg: String,
    #[serde(default)]
    pub func: String,
    #[serde(default)]
    pub parentgoid: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoRoutinePacket {
    pub ts: i64,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub delta: bool,
    #[serde(default)]
    pub stacks: Vec<GoRoutineStackWire>,
    #[serde(default)]
    pub decls: Vec<GoRoutineDeclWire>,
}

/// One retained stack sample for a goroutine "bounded history
/// of `GoRoutineStack{Ts, State, StackTrace}`".
#[derive(Debug, Clone)]
pub struct GoRoutineStack {
    pub ts: i64,
    pub state: String,
    pub stack_trace: String,
}

/// Server-side entity for one observed goroutine, stable by `GoId`.
#[derive(Debug, Clone)]
pub struct GoRoutineEntry {
    pub go_id: i64,
    pub name: String,
    pub tags: Vec<String>,
    pub created_by_package: String,
    pub created_by_func: String,
    pub parent_go_id: Option<i64>,
    pub first_seen_ts: i64,
    pub last_seen_ts: i64,
    pub missed_samples: u32,
    pub end_ts: Option<i64>,
    pub history: crate::ringbuffer::RingBuffer<GoRoutineStack>,
}

impl GoRoutineEntry {
    /// Active: present in the most recent full census. A goroutine that
    /// drops out of one non-delta snapshot is terminated immediately, so
    /// there is no intermediate "missing but not yet dead" state.
    pub fn is_active(&self) -> bool {
        self.missed_samples == 0 && self.end_ts.is_none()
    }

    pub fn is_terminated(&self) -> bool {
        self.end_ts.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchDeclWire {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "type", default)]
    pub ty: String,
    #[serde(default)]
    pub fmt: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchSampleWire {
    pub name: String,
    #[serde(default)]
    pub same: bool,
    #[serde(default)]
    pub kind: String,
    #[serde(rename = "type", default)]
    pub ty: String,
    #[serde(default)]
    pub val: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub addr: Vec<String>,
    #[serde(default)]
    pub len: Option<i64>,
    #[serde(default)]
    pub cap: Option<i64>,
    #[serde(default)]
    pub fmt: String,
    #[serde(default)]
    pub polldur: i64,
    #[serde(default)]
    pub ts: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegErrorWire {
    #[serde(rename = "ref")]
    pub reference: String,
    pub error: String,
    #[serde(default)]
    pub line: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchPacket {
    pub ts: i64,
    #[serde(default)]
    pub delta: bool,
    #[serde(default)]
    pub decls: Vec<WatchDeclWire>,
    #[serde(default)]
    pub watches: Vec<WatchSampleWire>,
    #[serde(default)]
    pub regerrors: Vec<RegErrorWire>,
}

/// A materialized sample, after `Same` deltas have been expanded against the
/// previous sample.
#[derive(Debug, Clone, Serialize)]
pub struct WatchSample {
    pub kind: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub val: String,
    pub error: Option<String>,
    pub addr: Vec<String>,
    pub len: Option<i64>,
    pub cap: Option<i64>,
    pub fmt: String,
    pub poll_dur: i64,
    pub ts: i64,
}

/// Server-side entity for one declared watch, stable by `(Name, AppRunId)`.
#[derive(Debug, Clone)]
pub struct WatchEntry {
    pub watch_num: i64,
    pub name: String,
    pub tags: Vec<String>,
    pub ty: String,
    pub fmt: String,
    pub file: String,
    pub line: i64,
    pub latest: Option<WatchSample>,
    pub history: crate::ringbuffer::RingBuffer<WatchSample>,
    pub reg_errors: Vec<RegErrorWire>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MemStats {
    #[serde(default)]
    pub alloc: u64,
    #[serde(default)]
    pub sys: u64,
    #[serde(rename = "heapalloc", default)]
    pub heap_alloc: u64,
    #[serde(rename = "heapsys", default)]
    pub heap_sys: u64,
    #[serde(rename = "heapidle", default)]
    pub heap_idle: u64,
    #[serde(rename = "heapinuse", default)]
    pub heap_inuse: u64,
    #[serde(rename = "heapreleased", default)]
    pub heap_released: u64,
    #[serde(rename = "heapobjects", default)]
    pub heap_objects: u64,
    #[serde(rename = "stackinuse", default)]
    pub stack_inuse: u64,
    #[serde(rename = "stacksys", default)]
    pub stack_sys: u64,
    #[serde(rename = "numgc", default)]
    pub num_gc: u64,
    #[serde(rename = "pausetotalns", default)]
    pub pause_total_ns: u64,
}

/// `runtimestats` packet body, retained verbatim as the time-series sample.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeStatsSample {
    pub ts: i64,
    pub goroutinecount: i64,
    pub gomaxprocs: i64,
    pub numcpu: i64,
    #[serde(default)]
    pub goos: String,
    #[serde(default)]
    pub goarch: String,
    #[serde(default)]
    pub goversion: String,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub memstats: MemStats,
}

/// Goroutines created by the SDK's own instrumentation rather than the
/// observed application, identified by package prefix.
pub fn is_outrig_internal(pkg: &str) -> bool {
    pkg.starts_with("outrig_sdk") || pkg.starts_with("outrig::")
}

impl crate::search::exec::SearchObject for GoRoutineEntry {
    fn get_field(&self, name: &str) -> Option<String> {
        match name {
            "name" => Some(self.name.clone()),
            "state" => self.history.last().map(|h| h.state.clone()),
            "pkg" => Some(self.created_by_package.clone()),
            "func" => Some(self.created_by_func.clone()),
            _ => None,
        }
    }

    fn get_all_text(&self) -> String {
        let stack = self.history.last().map(|h| h.stack_trace.clone()).unwrap_or_default();
        format!("{} {} {}", self.name, self.created_by_func, stack)
    }

    fn get_tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn get_numeric_field(&self, name: &str) -> Option<f64> {
        match name {
            "goid" => Some(self.go_id as f64),
            "parentgoid" => self.parent_go_id.map(|v| v as f64),
            _ => None,
        }
    }
}

impl crate::search::exec::SearchObject for WatchEntry {
    fn get_field(&self, name: &str) -> Option<String> {
        match name {
            "name" => Some(self.name.clone()),
            "type" => Some(self.ty.clone()),
            "val" => self.latest.as_ref().map(|w| w.val.clone()),
            _ => None,
        }
    }

    fn get_all_text(&self) -> String {
        let val = self.latest.as_ref().map(|w| w.val.as_str()).unwrap_or_default();
        format!("{} {}", self.name, val)
    }

    fn get_tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn get_numeric_field(&self, name: &str) -> Option<f64> {
        match name {
            "watchnum" => Some(self.watch_num as f64),
            "len" => self.latest.as_ref().and_then(|w| w.len).map(|v| v as f64),
            "cap" => self.latest.as_ref().and_then(|w| w.cap).map(|v| v as f64),
            _ => None,
        }
    }
}

impl crate::search::exec::SearchObject for LogLine {
    fn get_field(&self, name: &str) -> Option<String> {
        match name {
            "msg" => Some(self.msg.clone()),
            "source" => Some(self.source.clone()),
            _ => None,
        }
    }

    fn get_all_text(&self) -> String {
        self.msg.clone()
    }

    fn get_tags(&self) -> Vec<String> {
        Vec::new()
    }

    fn get_numeric_field(&self, name: &str) -> Option<f64> {
        match name {
            "linenum" => Some(self.linenum as f64),
            "ts" => Some(self.ts as f64),
            _ => None,
        }
    }
}

/// Summary row for `getappruns`.
#[derive(Debug, Clone, Serialize)]
pub struct AppRunInfo {
    pub app_run_id: AppRunId,
    pub app_name: String,
    pub module_name: String,
    pub pid: i64,
    pub executable: String,
    pub args: Vec<String>,
    pub user: String,
    pub hostname: String,
    pub start_time: i64,
    pub last_mod_time: i64,
    pub status: AppRunStatus,
    pub outrig_sdk_version: String,
}
