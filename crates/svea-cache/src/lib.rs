// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The reload cache: a content-addressed store of previously seen action
//! sequences, keyed by a fingerprint of the triggering task and the desktop
//! state it ran against.
//!
//! An exact hit lets the orchestrator replay the recorded actions and skip
//! the LLM call entirely; fuzzy candidates are offered to the agent as a
//! hint so it can choose to replay.  Replaying is only legal while every
//! window the recording depended on still exists.

mod fingerprint;
mod store;

pub use fingerprint::{normalize, window_state_hash, Fingerprint};
pub use store::{CacheEntry, LookupResult, ReloadCache, ScoredCandidate};
