// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leaf error types for the collector/watch subsystem: sampling errors and
//! registration errors. Transport and encoding errors live next to the code
//! that produces them ([`crate::transport::TransportError`]).

use thiserror::Error;

/// Error produced while sampling a single watch or collector value. Stored
/// in the sample's `Error` field on the wire rather than aborting the tick.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("timeout waiting for lock")]
    LockTimeout,
    #[error("marshal error: {0}")]
    Marshal(#[from] serde_json::Error),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

/// Error produced while validating a watch declaration at registration time.
/// Accumulated and reported in the next `watch` packet's `RegErrors`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("func-polled watch must take zero arguments and return exactly one value")]
    FuncArity,
    #[error("atomic-polled watch requires a pointer to a supported atomic type")]
    InvalidAtomicTarget,
    #[error("watch {0:?} is already registered for this app-run")]
    DuplicateName(String),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
