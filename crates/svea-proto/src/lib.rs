// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Wire protocol between the desktop shell client and the orchestration
//! server, plus the desktop action grammar shared by every layer.
//!
//! All types derive `Serialize`/`Deserialize` and are encoded as JSON over
//! WebSocket text frames — comfortable for browsers and debugging.  Client
//! envelope tags are SCREAMING_SNAKE (`USER_MESSAGE`), action tags are the
//! dotted form the window manager dispatches on (`window.create`), and all
//! field names are camelCase to match the JS client.

mod action;
mod client;
mod interaction;
mod server;
mod window;

pub use action::{DesktopAction, UpdateOp, UpdateOperation};
pub use client::ClientEvent;
pub use interaction::UserInteraction;
pub use server::{ConnectionState, ServerEvent, ToolStatus, WindowAgentState};
pub use window::{WindowBounds, WindowContent, WindowState};
