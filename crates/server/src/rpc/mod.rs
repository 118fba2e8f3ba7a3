// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message envelope, route table, event broker, and RPC command dispatch.

pub mod broker;
pub mod handlers;
pub mod message;
pub mod router;

pub use broker::{Event, EventBroker, Scope};
pub use handlers::dispatch;
pub use message::Message;
pub use router::{Router, RouterError, RouteId};
