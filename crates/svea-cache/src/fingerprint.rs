// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Summary of a task and the desktop it ran against, used to key the
/// reload cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Task kind: `"main"`, `"window"`, or `"component_action"`.
    pub trigger_kind: String,
    /// Kind-specific target (window id, component action id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_target: Option<String>,
    /// Word bigrams of the normalized content (unigrams when the text has
    /// fewer than two words).  Sorted so serialization is deterministic.
    pub ngrams: BTreeSet<String>,
    /// sha256 of the normalized content, hex.
    pub content_hash: String,
    /// Truncated sha256 of the sorted `id:renderer` pairs.
    pub window_state_hash: String,
}

fn injected_block_res() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"(?s)<open_windows>.*?</open_windows>").unwrap(),
            Regex::new(r"(?s)<user_interaction:[\w-]+>.*?</user_interaction:[\w-]+>").unwrap(),
            Regex::new(r"(?s)<previous_interactions>.*?</previous_interactions>").unwrap(),
        ]
    })
}

/// Normalize task content for hashing: strip the injected context blocks,
/// lowercase, and collapse whitespace runs.  Idempotent.
pub fn normalize(content: &str) -> String {
    let mut text = content.to_string();
    for re in injected_block_res() {
        text = re.replace_all(&text, " ").into_owned();
    }
    let lowered = text.to_lowercase();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn word_ngrams(normalized: &str) -> BTreeSet<String> {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.len() < 2 {
        return words.into_iter().map(str::to_string).collect();
    }
    words.windows(2).map(|w| w.join(" ")).collect()
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash of the open-window set: sorted `id:renderer` pairs joined by `|`,
/// sha256, first 16 hex chars.
pub fn window_state_hash(windows: &[(String, String)]) -> String {
    let mut pairs: Vec<String> = windows
        .iter()
        .map(|(id, renderer)| format!("{id}:{renderer}"))
        .collect();
    pairs.sort();
    let mut digest = sha256_hex(&pairs.join("|"));
    digest.truncate(16);
    digest
}

impl Fingerprint {
    pub fn compute(
        trigger_kind: &str,
        trigger_target: Option<&str>,
        content: &str,
        windows: &[(String, String)],
    ) -> Self {
        let normalized = normalize(content);
        Self {
            trigger_kind: trigger_kind.to_string(),
            trigger_target: trigger_target.map(str::to_string),
            ngrams: word_ngrams(&normalized),
            content_hash: sha256_hex(&normalized),
            window_state_hash: window_state_hash(windows),
        }
    }

    /// Weighted similarity in `[0, 1]`:
    /// `0.5·trigger + 0.3·jaccard(ngrams) + 0.2·window-state-equality`.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        let trigger = if self.trigger_kind == other.trigger_kind {
            if self.trigger_target == other.trigger_target {
                0.5
            } else {
                0.25
            }
        } else {
            0.0
        };

        let jaccard = {
            let inter = self.ngrams.intersection(&other.ngrams).count();
            let union = self.ngrams.union(&other.ngrams).count();
            if union == 0 {
                1.0
            } else {
                inter as f64 / union as f64
            }
        };

        let window = if self.window_state_hash == other.window_state_hash {
            1.0
        } else {
            0.0
        };

        trigger + 0.3 * jaccard + 0.2 * window
    }

    /// Exact means near-identity similarity *and* the same content hash.
    pub fn is_exact_match(&self, other: &Fingerprint) -> bool {
        self.content_hash == other.content_hash && self.similarity(other) >= 0.95
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
