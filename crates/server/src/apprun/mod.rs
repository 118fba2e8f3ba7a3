// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-app-run server state and ingestion.

pub mod ingest;
pub mod peer;
pub mod registry;
pub mod types;

pub use ingest::{ingest_line, IngestOutcome, RawPacket};
pub use peer::{AppRunPeer, IngestError};
pub use registry::AppRunRegistry;
pub use types::*;
