// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket layer: binds browser connections to per-connection context
//! pools.
//!
//! # Wire format
//!
//! JSON over WebSocket (text frames).  This is comfortable for browsers and
//! keeps the protocol debuggable with plain `websocat`.
//!
//! # Shape
//!
//! Each connection gets its own [`svea_core::ContextPool`]; the broadcast
//! center, the global agent limiter, the reload cache, and the session
//! logger are process-wide and shared through [`ServerState`].

mod connection;
mod router;
mod state;

pub use router::{router, serve};
pub use state::{build_warm_pool, ServerState};
