// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The RPC wire envelope exchanged over the WebSocket gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message on the wire. Every field is optional because a single shape
/// covers requests, response fragments, cancellation, route bookkeeping, and
/// event sub/unsub/publish.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(rename = "reqid", skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(rename = "resid", skip_serializing_if = "Option::is_none")]
    pub res_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cont: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(rename = "noresponse", skip_serializing_if = "Option::is_none")]
    pub no_response: Option<bool>,
}

impl Message {
    pub fn request(command: impl Into<String>, req_id: impl Into<String>, data: Value) -> Self {
        Self { command: Some(command.into()), req_id: Some(req_id.into()), data: Some(data), ..Default::default() }
    }

    /// A single, non-streaming response fragment (`Cont` absent/false).
    pub fn response(res_id: impl Into<String>, data: Value) -> Self {
        Self { res_id: Some(res_id.into()), data: Some(data), ..Default::default() }
    }

    /// A streaming response fragment; the caller sends a final one with
    /// `cont: Some(false)` to close the stream.
    pub fn stream_response(res_id: impl Into<String>, data: Value, cont: bool) -> Self {
        Self { res_id: Some(res_id.into()), data: Some(data), cont: Some(cont), ..Default::default() }
    }

    pub fn error_response(res_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self { res_id: Some(res_id.into()), error: Some(error.into()), ..Default::default() }
    }

    pub fn is_cancel(&self) -> bool {
        self.cancel.unwrap_or(false)
    }

    pub fn is_continuing(&self) -> bool {
        self.cont.unwrap_or(false)
    }
}
