// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Black-box scenarios driving a real `outrig-server` process the way an
//! SDK-instrumented app and a UI tab would.

use std::time::Duration;

use outrig_specs::{PacketClient, ServerProcess, WsClient};
use serde_json::json;

#[tokio::test]
async fn log_line_sent_by_sdk_is_searchable_over_ws() {
    let server = ServerProcess::start().expect("spawn outrig-server");
    server.wait_healthy(Duration::from_secs(5)).await.expect("server became healthy");

    let mut packet = PacketClient::connect(server.domain_socket()).await.expect("connect packet client");
    packet.send_log(1, "hello from the harness").await.expect("send log line");

    // Give the server a moment to ingest before querying.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut ws = WsClient::connect(&server.ws_url("frontend:smoke")).await.expect("connect ws client");

    let appruns = ws.call("getappruns", json!({ "since": 0 })).await.expect("getappruns");
    let runs = appruns["appruns"].as_array().expect("appruns array");
    assert!(runs.iter().any(|r| r["apprunid"] == packet.apprun_id.to_string()), "apprun not registered: {appruns:?}");

    let search = ws
        .call(
            "logsearchrequest",
            json!({
                "widgetid": "w1",
                "apprunid": packet.apprun_id,
                "searchterm": "",
                "offset": 0,
                "limit": 100,
            }),
        )
        .await
        .expect("logsearchrequest");

    let lines = search["lines"].as_array().expect("lines array");
    assert!(lines.iter().any(|l| l["msg"] == "hello from the harness"), "log line not found: {search:?}");
}

#[tokio::test]
async fn streaming_log_search_pushes_new_lines_to_the_subscribed_route() {
    let server = ServerProcess::start().expect("spawn outrig-server");
    server.wait_healthy(Duration::from_secs(5)).await.expect("server became healthy");

    let mut packet = PacketClient::connect(server.domain_socket()).await.expect("connect packet client");
    packet.send_log(1, "first line").await.expect("send first line");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut ws = WsClient::connect(&server.ws_url("frontend:stream")).await.expect("connect ws client");
    ws.call(
        "logsearchrequest",
        json!({
            "widgetid": "w-stream",
            "apprunid": packet.apprun_id,
            "searchterm": "",
            "offset": 0,
            "limit": 100,
            "stream": true,
        }),
    )
    .await
    .expect("logsearchrequest with stream:true");

    packet.send_log(2, "second line, pushed live").await.expect("send second line");

    let push = ws.next_push(Duration::from_secs(5)).await.expect("logstreamupdate push");
    assert_eq!(push["command"], "logstreamupdate");
    let lines = push["data"]["lines"].as_array().expect("pushed lines array");
    assert!(lines.iter().any(|l| l["msg"] == "second line, pushed live"), "pushed update missing new line: {push:?}");
}

#[tokio::test]
async fn event_subscription_receives_published_events_matching_scope() {
    let server = ServerProcess::start().expect("spawn outrig-server");
    server.wait_healthy(Duration::from_secs(5)).await.expect("server became healthy");

    let mut ws = WsClient::connect(&server.ws_url("frontend:events")).await.expect("connect ws client");
    ws.call("eventsub", json!({ "eventtype": "build.finished", "scope": "ci" }))
        .await
        .expect("eventsub");

    // A second publisher role also speaks the RPC surface, same as the first.
    let mut publisher = WsClient::connect(&server.ws_url("frontend:publisher")).await.expect("connect publisher");
    publisher
        .call("eventpublish", json!({ "eventtype": "build.finished", "scope": "ci", "data": { "ok": true } }))
        .await
        .expect("eventpublish");

    let push = ws.next_push(Duration::from_secs(5)).await.expect("eventupdate push");
    assert_eq!(push["command"], "eventupdate");
    assert_eq!(push["data"]["eventtype"], "build.finished");

    ws.call("eventunsuball", json!({})).await.expect("eventunsuball");

    publisher
        .call("eventpublish", json!({ "eventtype": "build.finished", "scope": "ci", "data": { "ok": true } }))
        .await
        .expect("second eventpublish");

    let result = tokio::time::timeout(Duration::from_millis(500), ws.next_push(Duration::from_secs(5))).await;
    assert!(result.is_err(), "expected no further push after eventunsuball, got one");
}
