// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler functions for the RPC surface table, dispatched by
//! `Command` string from the WebSocket gateway.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::apprun::types::is_outrig_internal;
use crate::apprun::{AppRunId, AppRunRegistry};
use crate::error::ServerError;
use crate::search::exec::CompiledSearch;
use crate::state::ServerState;

fn parse<T: for<'de> Deserialize<'de>>(data: &Value) -> Result<T, ServerError> {
    serde_json::from_value(data.clone()).map_err(|_| ServerError::BadRequest)
}

async fn peer_for(registry: &AppRunRegistry, id: AppRunId) -> Result<Arc<crate::apprun::AppRunPeer>, ServerError> {
    registry.get(&id).await.ok_or(ServerError::AppRunNotFound)
}

#[derive(Deserialize)]
struct GetAppRunsReq {
    #[serde(default)]
    since: i64,
}

pub async fn get_app_runs(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: GetAppRunsReq = parse(data)?;
    let appruns = state.apprun_registry.list_since(req.since).await;
    Ok(json!({ "appruns": appruns }))
}

#[derive(Deserialize)]
struct ByIdsReq {
    apprunid: AppRunId,
    #[serde(default)]
    goids: Vec<i64>,
}

pub async fn get_app_run_goroutines_by_ids(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: ByIdsReq = parse(data)?;
    let peer = peer_for(&state.apprun_registry, req.apprunid).await?;
    let goroutines = peer.goroutines_by_ids(&req.goids).await;
    Ok(json!({ "goroutines": goroutines_to_json(&goroutines) }))
}

#[derive(Deserialize)]
struct WatchesByIdsReq {
    apprunid: AppRunId,
    #[serde(default)]
    watchids: Vec<i64>,
}

pub async fn get_app_run_watches_by_ids(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: WatchesByIdsReq = parse(data)?;
    let peer = peer_for(&state.apprun_registry, req.apprunid).await?;
    let watches = peer.watches_by_nums(&req.watchids).await;
    Ok(json!({ "watches": watches_to_json(&watches) }))
}

#[derive(Deserialize)]
struct RuntimeStatsReq {
    apprunid: AppRunId,
    #[serde(default)]
    since: i64,
}

pub async fn get_app_run_runtime_stats(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: RuntimeStatsReq = parse(data)?;
    let peer = peer_for(&state.apprun_registry, req.apprunid).await?;
    let stats = peer.runtime_stats_since(req.since).await;
    let (num_total_goroutines, num_active_goroutines) = peer.goroutine_counts().await;
    let goroutines = peer.goroutines_snapshot().await;
    let num_outrig_goroutines =
        goroutines.iter().filter(|g| is_outrig_internal(&g.created_by_package)).count();
    Ok(json!({
        "stats": stats,
        "numtotalgoroutines": num_total_goroutines,
        "numactivegoroutines": num_active_goroutines,
        "numoutriggoroutines": num_outrig_goroutines,
    }))
}

#[derive(Deserialize)]
struct SearchReq {
    apprunid: AppRunId,
    #[serde(default)]
    searchterm: String,
    #[serde(default)]
    systemquery: Option<String>,
}

fn full_query(req: &SearchReq) -> String {
    match &req.systemquery {
        Some(sq) if !sq.is_empty() => format!("{} {}", req.searchterm, sq),
        _ => req.searchterm.clone(),
    }
}

pub async fn goroutine_search_request(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: SearchReq = parse(data)?;
    let peer = peer_for(&state.apprun_registry, req.apprunid).await?;
    let goroutines = peer.goroutines_snapshot().await;
    let compiled = CompiledSearch::compile(&full_query(&req));
    let result = compiled.apply(&goroutines, |g| Box::new(g.clone()));
    let total_nonoutrig = goroutines.iter().filter(|g| !is_outrig_internal(&g.created_by_package)).count();
    let results: Vec<i64> = result.matched.iter().map(|g| g.go_id).collect();
    Ok(json!({
        "searchedcount": result.searched_count,
        "totalcount": result.total_count,
        "totalnonoutrig": total_nonoutrig,
        "results": results,
        "errorspans": error_spans_to_json(&result.error_spans),
    }))
}

pub async fn watch_search_request(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: SearchReq = parse(data)?;
    let peer = peer_for(&state.apprun_registry, req.apprunid).await?;
    let watches = peer.watches_snapshot().await;
    let compiled = CompiledSearch::compile(&full_query(&req));
    let result = compiled.apply(&watches, |w| Box::new(w.clone()));
    let results: Vec<i64> = result.matched.iter().map(|w| w.watch_num).collect();
    Ok(json!({
        "searchedcount": result.searched_count,
        "totalcount": result.total_count,
        "results": results,
        "errorspans": error_spans_to_json(&result.error_spans),
    }))
}

#[derive(Deserialize)]
struct LogSearchReq {
    widgetid: String,
    apprunid: AppRunId,
    #[serde(default)]
    searchterm: String,
    #[serde(default)]
    offset: u64,
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    buffer: u64,
    #[serde(default)]
    stream: bool,
}

fn default_limit() -> u64 {
    100
}

/// `logsearchrequest`: get-or-create the widget's persistent search manager,
/// scan current logs, and (if `stream`) attach a streaming listener so future
/// lines push `logstreamupdate` messages to the same route.
pub async fn log_search_request(state: &ServerState, data: &Value, route_id: &str) -> Result<Value, ServerError> {
    let req: LogSearchReq = parse(data)?;
    let peer = peer_for(&state.apprun_registry, req.apprunid).await?;

    let manager = state.log_search_manager(&req.widgetid, &req.searchterm, req.apprunid).await;
    manager.set_query(&req.searchterm).await;
    manager.set_window(req.offset, req.limit, req.buffer);
    manager.touch(crate::state::epoch_ms());

    let logs = peer.logs_all().await;
    let page = manager.snapshot_page(&logs, |l| Box::new((**l).clone())).await;

    if req.stream {
        state.attach_log_stream(Arc::clone(&manager), &peer, route_id.to_owned()).await;
    }

    Ok(json!({
        "widgetid": page.widget_id,
        "filteredcount": page.filtered_count,
        "totalcount": page.total_count,
        "lines": page.items,
    }))
}

#[derive(Deserialize)]
struct LogWidgetAdminReq {
    widgetid: String,
    #[serde(default)]
    keepalive: bool,
    #[serde(default)]
    drop: bool,
}

pub async fn log_widget_admin(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: LogWidgetAdminReq = parse(data)?;
    if req.drop {
        state.drop_log_widget(&req.widgetid).await;
    } else if req.keepalive {
        if let Some(manager) = state.log_managers.get(&req.widgetid).await {
            manager.touch(crate::state::epoch_ms());
        }
    }
    Ok(json!({}))
}

#[derive(Deserialize)]
struct UpdateMarkedLinesReq {
    widgetid: String,
    #[serde(default)]
    add: Vec<i64>,
    #[serde(default)]
    remove: Vec<i64>,
}

/// `logupdatemarkedlines`: mutate the per-widget mark set, persisted
/// alongside, not inside, the search manager.
pub async fn log_update_marked_lines(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: UpdateMarkedLinesReq = parse(data)?;
    let marks = state.marked_lines.get_or_create(req.widgetid, || tokio::sync::RwLock::new(std::collections::HashSet::new())).await;
    let mut guard = marks.write().await;
    for line in req.add {
        guard.insert(line);
    }
    for line in req.remove {
        guard.remove(&line);
    }
    Ok(json!({}))
}

#[derive(Deserialize)]
struct GetMarkedLinesReq {
    widgetid: String,
}

pub async fn log_get_marked_lines(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: GetMarkedLinesReq = parse(data)?;
    let mut lines: Vec<i64> = match state.marked_lines.get(&req.widgetid).await {
        Some(marks) => marks.read().await.iter().copied().collect(),
        None => Vec::new(),
    };
    lines.sort_unstable();
    Ok(json!({ "linenums": lines }))
}

#[derive(Deserialize)]
struct EventPublishReq {
    eventtype: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    data: Value,
}

pub async fn event_publish(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: EventPublishReq = parse(data)?;
    state
        .event_broker
        .publish(crate::rpc::broker::Event {
            event_type: req.eventtype,
            scope: req.scope,
            data: req.data,
            ts: crate::state::epoch_ms() as i64,
        })
        .await;
    Ok(json!({}))
}

#[derive(Deserialize)]
struct EventReadHistoryReq {
    eventtype: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    100
}

pub async fn event_read_history(state: &ServerState, data: &Value) -> Result<Value, ServerError> {
    let req: EventReadHistoryReq = parse(data)?;
    let scope = match req.scope {
        Some(s) => crate::rpc::broker::Scope::Named(s),
        None => crate::rpc::broker::Scope::All,
    };
    let events = state.event_broker.read_history(&req.eventtype, &scope, req.limit).await;
    Ok(json!({ "events": events }))
}

#[derive(Deserialize)]
struct EventSubReq {
    eventtype: String,
    #[serde(default)]
    scope: Option<String>,
}

fn req_scope(scope: Option<String>) -> crate::rpc::broker::Scope {
    match scope {
        Some(s) => crate::rpc::broker::Scope::Named(s),
        None => crate::rpc::broker::Scope::All,
    }
}

/// `eventsub`: subscribe the calling route to future events of `eventtype`
/// matching `scope`. Pushed as `eventupdate` messages on the
/// same route.
pub async fn event_sub(state: &ServerState, data: &Value, route_id: &str) -> Result<Value, ServerError> {
    let req: EventSubReq = parse(data)?;
    state.subscribe_events(route_id, &req.eventtype, req_scope(req.scope)).await;
    Ok(json!({}))
}

/// `eventunsub`: cancel one subscription previously created by `eventsub`.
pub async fn event_unsub(state: &ServerState, data: &Value, route_id: &str) -> Result<Value, ServerError> {
    let req: EventSubReq = parse(data)?;
    state.unsubscribe_events(route_id, &req.eventtype, &req_scope(req.scope)).await;
    Ok(json!({}))
}

/// `eventunsuball`: cancel every subscription the calling route owns.
pub async fn event_unsub_all(state: &ServerState, _data: &Value, route_id: &str) -> Result<Value, ServerError> {
    state.unsubscribe_all_events(route_id).await;
    Ok(json!({}))
}

pub async fn clear_non_active_app_runs(state: &ServerState, _data: &Value) -> Result<Value, ServerError> {
    let removed = state.apprun_registry.clear_non_active().await;
    Ok(json!({ "removed": removed }))
}

fn error_spans_to_json(spans: &[(crate::search::token::Span, String)]) -> Vec<Value> {
    spans.iter().map(|(span, msg)| json!({ "start": span.start, "end": span.end, "message": msg })).collect()
}

fn goroutines_to_json(entries: &[crate::apprun::GoRoutineEntry]) -> Vec<Value> {
    entries
        .iter()
        .map(|g| {
            json!({
                "goid": g.go_id,
                "name": g.name,
                "tags": g.tags,
                "createdbypackage": g.created_by_package,
                "createdbyfunc": g.created_by_func,
                "parentgoid": g.parent_go_id,
                "firstseents": g.first_seen_ts,
                "lastseents": g.last_seen_ts,
                "endts": g.end_ts,
                "active": g.is_active(),
                "terminated": g.is_terminated(),
                "history": g.history.get_all().0.iter().map(|h| json!({
                    "ts": h.ts, "state": h.state, "stacktrace": h.stack_trace,
                })).collect::<Vec<_>>(),
            })
        })
        .collect()
}

fn watches_to_json(entries: &[crate::apprun::WatchEntry]) -> Vec<Value> {
    entries
        .iter()
        .map(|w| {
            json!({
                "watchnum": w.watch_num,
                "name": w.name,
                "tags": w.tags,
                "type": w.ty,
                "fmt": w.fmt,
                "file": w.file,
                "line": w.line,
                "latest": w.latest,
                "regerrors": w.reg_errors.iter().map(|e| json!({
                    "ref": e.reference, "error": e.error, "line": e.line,
                })).collect::<Vec<_>>(),
            })
        })
        .collect()
}

/// Dispatch one RPC by its `command` string. The
/// WebSocket gateway calls this per inbound `Message` with a `command` set.
pub async fn dispatch(state: &ServerState, command: &str, data: &Value, route_id: &str) -> Result<Value, ServerError> {
    match command {
        "getappruns" => get_app_runs(state, data).await,
        "getapprungoroutinesbyids" => get_app_run_goroutines_by_ids(state, data).await,
        "getapprunwatchesbyids" => get_app_run_watches_by_ids(state, data).await,
        "getapprunruntimestats" => get_app_run_runtime_stats(state, data).await,
        "goroutinesearchrequest" => goroutine_search_request(state, data).await,
        "watchsearchrequest" => watch_search_request(state, data).await,
        "logsearchrequest" => log_search_request(state, data, route_id).await,
        "logwidgetadmin" => log_widget_admin(state, data).await,
        "logupdatemarkedlines" => log_update_marked_lines(state, data).await,
        "loggetmarkedlines" => log_get_marked_lines(state, data).await,
        "eventpublish" => event_publish(state, data).await,
        "eventreadhistory" => event_read_history(state, data).await,
        "eventsub" => event_sub(state, data, route_id).await,
        "eventunsub" => event_unsub(state, data, route_id).await,
        "eventunsuball" => event_unsub_all(state, data, route_id).await,
        "clearnonactiveappruns" => clear_non_active_app_runs(state, data).await,
        other => {
            tracing::warn!(command = %other, "unknown RPC command");
            Err(ServerError::BadRequest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apprun::types::{AppInfoPacket, BuildInfo};

    fn appinfo(id: AppRunId) -> AppInfoPacket {
        AppInfoPacket {
            apprunid: id,
            appname: "testapp".to_owned(),
            modulename: String::new(),
            executable: String::new(),
            args: Vec::new(),
            env: Vec::new(),
            starttime: 1000,
            pid: 1,
            user: String::new(),
            hostname: String::new(),
            buildinfo: BuildInfo::default(),
            outrigsdkversion: String::new(),
        }
    }

    #[tokio::test]
    async fn get_app_runs_filters_by_since() {
        let state = ServerState::new();
        let id = uuid::Uuid::new_v4();
        state.apprun_registry.get_or_create(appinfo(id), 5000).await;
        let result = get_app_runs(&state, &json!({ "since": 1000 })).await.unwrap();
        assert_eq!(result["appruns"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_app_run_runtime_stats_counts_active_and_outrig_goroutines() {
        let state = ServerState::new();
        let id = uuid::Uuid::new_v4();
        let peer = state.apprun_registry.get_or_create(appinfo(id), 1000).await;
        peer.ingest_goroutine(crate::apprun::types::GoRoutinePacket {
            ts: 1000,
            count: 1,
            delta: false,
            stacks: vec![crate::apprun::types::GoRoutineStackWire {
                goid: 1,
                ts: 1000,
                same: false,
                state: "running".to_owned(),
                name: None,
                tags: Vec::new(),
                stacktrace: Some("main.foo()".to_owned()),
            }],
            decls: vec![crate::apprun::types::GoRoutineDeclWire {
                goid: 1,
                name: String::new(),
                tags: Vec::new(),
                pkg: "outrig_sdk/collectors".to_owned(),
                func: String::new(),
                parentgoid: None,
            }],
        })
        .await
        .unwrap();

        let result = get_app_run_runtime_stats(&state, &json!({ "apprunid": id, "since": 0 })).await.unwrap();
        assert_eq!(result["numtotalgoroutines"], 1);
        assert_eq!(result["numactivegoroutines"], 1);
        assert_eq!(result["numoutriggoroutines"], 1);
    }

    #[tokio::test]
    async fn log_search_request_returns_matching_page_and_registers_widget() {
        let state = ServerState::new();
        let id = uuid::Uuid::new_v4();
        let peer = state.apprun_registry.get_or_create(appinfo(id), 1000).await;
        peer.ingest_log(crate::apprun::types::LogLine {
            linenum: 1,
            ts: 1001,
            msg: "boom: disk full".to_owned(),
            source: "/dev/stdout".to_owned(),
        })
        .await
        .unwrap();
        peer.ingest_log(crate::apprun::types::LogLine {
            linenum: 2,
            ts: 1002,
            msg: "all fine".to_owned(),
            source: "/dev/stdout".to_owned(),
        })
        .await
        .unwrap();

        let result = log_search_request(
            &state,
            &json!({ "widgetid": "w1", "apprunid": id, "searchterm": "boom", "limit": 10 }),
            "frontend:1",
        )
        .await
        .unwrap();
        assert_eq!(result["filteredcount"], 1);
        assert_eq!(result["totalcount"], 2);
        assert!(state.log_managers.get(&"w1".to_owned()).await.is_some());
    }

    #[tokio::test]
    async fn marked_lines_round_trip() {
        let state = ServerState::new();
        log_update_marked_lines(&state, &json!({ "widgetid": "w1", "add": [3, 7] })).await.unwrap();
        let result = log_get_marked_lines(&state, &json!({ "widgetid": "w1" })).await.unwrap();
        assert_eq!(result["linenums"], json!([3, 7]));

        log_update_marked_lines(&state, &json!({ "widgetid": "w1", "remove": [3] })).await.unwrap();
        let result = log_get_marked_lines(&state, &json!({ "widgetid": "w1" })).await.unwrap();
        assert_eq!(result["linenums"], json!([7]));
    }

    #[tokio::test]
    async fn event_publish_then_read_history_round_trips() {
        let state = ServerState::new();
        event_publish(&state, &json!({ "eventtype": "apprun:status", "scope": "run-1", "data": {"x": 1} }))
            .await
            .unwrap();
        let result =
            event_read_history(&state, &json!({ "eventtype": "apprun:status", "scope": "run-1" })).await.unwrap();
        assert_eq!(result["events"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn eventsub_pushes_future_matching_events_to_the_route() {
        let state = ServerState::new();
        let mut route_rx = state.router.announce_route("tab:1".to_owned()).await;

        event_sub(&state, &json!({ "eventtype": "apprun:status", "scope": "run-1" }), "tab:1").await.unwrap();
        event_publish(&state, &json!({ "eventtype": "apprun:status", "scope": "run-1", "data": {"x": 1} }))
            .await
            .unwrap();
        event_publish(&state, &json!({ "eventtype": "apprun:status", "scope": "run-2", "data": {"x": 2} }))
            .await
            .unwrap();

        let pushed = tokio::time::timeout(std::time::Duration::from_secs(1), route_rx.recv()).await.unwrap().unwrap();
        assert_eq!(pushed.command.as_deref(), Some("eventupdate"));
        assert_eq!(pushed.data.as_ref().unwrap()["scope"], "run-1");

        let none_yet = tokio::time::timeout(std::time::Duration::from_millis(100), route_rx.recv()).await;
        assert!(none_yet.is_err(), "non-matching scope must not be pushed");
    }

    #[tokio::test]
    async fn eventunsuball_stops_further_pushes() {
        let state = ServerState::new();
        let mut route_rx = state.router.announce_route("tab:2".to_owned()).await;
        event_sub(&state, &json!({ "eventtype": "apprun:status" }), "tab:2").await.unwrap();
        event_unsub_all(&state, &json!({}), "tab:2").await.unwrap();

        event_publish(&state, &json!({ "eventtype": "apprun:status", "scope": "run-1", "data": {} })).await.unwrap();
        let none = tokio::time::timeout(std::time::Duration::from_millis(100), route_rx.recv()).await;
        assert!(none.is_err());
    }

    #[tokio::test]
    async fn unknown_apprun_returns_not_found() {
        let state = ServerState::new();
        let result = get_app_run_runtime_stats(&state, &json!({ "apprunid": uuid::Uuid::new_v4(), "since": 0 })).await;
        assert!(matches!(result, Err(ServerError::AppRunNotFound)));
    }
}
