// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error codes returned across the RPC surface and the ingestion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerError {
    Unauthorized,
    BadRequest,
    AppRunNotFound,
    WidgetNotFound,
    Terminal,
    Internal,
}

impl ServerError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::AppRunNotFound => 404,
            Self::WidgetNotFound => 404,
            Self::Terminal => 409,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::AppRunNotFound => "APPRUN_NOT_FOUND",
            Self::WidgetNotFound => "WIDGET_NOT_FOUND",
            Self::Terminal => "APPRUN_TERMINAL",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope, also used as the RPC `Error` field shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_maps_not_found_codes() {
        assert_eq!(ServerError::AppRunNotFound.http_status(), 404);
        assert_eq!(ServerError::WidgetNotFound.http_status(), 404);
    }

    #[test]
    fn to_error_body_carries_code_and_message() {
        let body = ServerError::Terminal.to_error_body("already done");
        assert_eq!(body.code, "APPRUN_TERMINAL");
        assert_eq!(body.message, "already done");
    }
}
