// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire packet shapes sent SDK → server, mirroring the
//! deserialize-side shapes in the server's `apprun::types` module field for
//! field.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Milliseconds since the Unix epoch, clamped to 0 if the clock is somehow
/// behind it. Used to stamp every wire packet.
pub fn now_unix_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Top-level wire envelope: `{type, data}` encoded as one line of JSON
///.
#[derive(Debug, Clone, Serialize)]
pub struct Packet {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl Packet {
    pub fn new(kind: impl Into<String>, data: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self { kind: kind.into(), data: serde_json::to_value(data)? })
    }

    /// Encode as a single newline-terminated JSON line.
    pub fn encode_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildInfo {
    #[serde(rename = "goversion")]
    pub go_version: String,
    pub path: String,
    pub version: String,
    pub settings: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppInfoPacket {
    pub apprunid: uuid::Uuid,
    pub appname: String,
    pub modulename: String,
    pub executable: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub starttime: i64,
    pub pid: i64,
    pub user: String,
    pub hostname: String,
    pub buildinfo: BuildInfo,
    pub outrigsdkversion: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub linenum: i64,
    pub ts: i64,
    pub msg: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiLogPacket {
    pub loglines: Vec<LogLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoRoutineStackWire {
    pub goid: i64,
    pub ts: i64,
    pub same: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoRoutineDeclWire {
    pub goid: i64,
    pub name: String,
    pub tags: Vec<String>,
    pub pkg: String,
    pub func: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parentgoid: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoRoutinePacket {
    pub ts: i64,
    pub count: i64,
    pub delta: bool,
    pub stacks: Vec<GoRoutineStackWire>,
    pub decls: Vec<GoRoutineDeclWire>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchDeclWire {
    pub name: String,
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub ty: String,
    pub fmt: String,
    pub file: String,
    pub line: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchSampleWire {
    pub name: String,
    pub same: bool,
    pub kind: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub val: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub addr: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<i64>,
    pub fmt: String,
    pub polldur: i64,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegErrorWire {
    #[serde(rename = "ref")]
    pub reference: String,
    pub error: String,
    pub line: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchPacket {
    pub ts: i64,
    pub delta: bool,
    pub decls: Vec<WatchDeclWire>,
    pub watches: Vec<WatchSampleWire>,
    pub regerrors: Vec<RegErrorWire>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemStats {
    pub alloc: u64,
    pub sys: u64,
    #[serde(rename = "heapalloc")]
    pub heap_alloc: u64,
    #[serde(rename = "heapsys")]
    pub heap_sys: u64,
    #[serde(rename = "heapidle")]
    pub heap_idle: u64,
    #[serde(rename = "heapinuse")]
    pub heap_inuse: u64,
    #[serde(rename = "heapreleased")]
    pub heap_released: u64,
    #[serde(rename = "heapobjects")]
    pub heap_objects: u64,
    #[serde(rename = "stackinuse")]
    pub stack_inuse: u64,
    #[serde(rename = "stacksys")]
    pub stack_sys: u64,
    #[serde(rename = "numgc")]
    pub num_gc: u64,
    #[serde(rename = "pausetotalns")]
    pub pause_total_ns: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatsSample {
    pub ts: i64,
    pub goroutinecount: i64,
    pub gomaxprocs: i64,
    pub numcpu: i64,
    pub goos: String,
    pub goarch: String,
    pub goversion: String,
    pub pid: i64,
    pub cwd: String,
    pub memstats: MemStats,
}
