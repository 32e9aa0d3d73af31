// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use svea_proto::DesktopAction;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Fingerprint;

/// One recorded action sequence.  Immutable after creation except for the
/// use/failure counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub label: String,
    pub fingerprint: Fingerprint,
    pub actions: Vec<DesktopAction>,
    /// Windows that must still exist for a replay to be legal.
    pub required_window_ids: Vec<String>,
    pub use_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub fail_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub entry: CacheEntry,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct LookupResult {
    pub exact: Option<CacheEntry>,
    /// Top-K fuzzy candidates above the threshold, best first.
    pub candidates: Vec<ScoredCandidate>,
}

/// On-disk format: a flat list, so hand-inspection and forward-compatible
/// parsing stay trivial.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: Vec<CacheEntry>,
}

/// Persistent mapping from entry id to recorded action sequence, with
/// similarity lookup over fingerprints.
pub struct ReloadCache {
    path: Option<PathBuf>,
    threshold: f64,
    top_k: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ReloadCache {
    /// Open (or create) the cache at `path`.  A corrupt or missing file
    /// starts empty rather than failing the boot.
    pub fn open(path: PathBuf, threshold: f64, top_k: usize) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<CacheFile>(&text) {
                Ok(file) => file.entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
                Err(e) => {
                    warn!(path = %path.display(), "reload cache unreadable, starting empty: {e}");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        debug!(count = entries.len(), "reload cache loaded");
        Self {
            path: Some(path),
            threshold,
            top_k,
            entries: Mutex::new(entries),
        }
    }

    /// Cache that never touches disk (tests, `cache.enabled = false`).
    pub fn in_memory(threshold: f64, top_k: usize) -> Self {
        Self {
            path: None,
            threshold,
            top_k,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a new entry; returns its id.
    pub fn record(
        &self,
        fingerprint: Fingerprint,
        actions: Vec<DesktopAction>,
        label: impl Into<String>,
        required_window_ids: Vec<String>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = CacheEntry {
            id: id.clone(),
            label: label.into(),
            fingerprint,
            actions,
            required_window_ids,
            use_count: 0,
            last_used_at: None,
            fail_count: 0,
            created_at: Utc::now(),
        };
        self.entries.lock().unwrap().insert(id.clone(), entry);
        self.persist();
        id
    }

    /// Exact hit plus top-K fuzzy candidates for `fingerprint`.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> LookupResult {
        let entries = self.entries.lock().unwrap();
        let mut exact: Option<CacheEntry> = None;
        let mut scored: Vec<ScoredCandidate> = Vec::new();

        for entry in entries.values() {
            if exact.is_none() && entry.fingerprint.is_exact_match(fingerprint) {
                exact = Some(entry.clone());
                continue;
            }
            let score = entry.fingerprint.similarity(fingerprint);
            if score >= self.threshold {
                scored.push(ScoredCandidate {
                    entry: entry.clone(),
                    score,
                });
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.top_k);
        LookupResult { exact, candidates: scored }
    }

    pub fn get(&self, id: &str) -> Option<CacheEntry> {
        self.entries.lock().unwrap().get(id).cloned()
    }

    pub fn mark_used(&self, id: &str) {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(e) = entries.get_mut(id) {
                e.use_count += 1;
                e.last_used_at = Some(Utc::now());
            }
        }
        self.persist();
    }

    pub fn mark_failed(&self, id: &str) {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(e) = entries.get_mut(id) {
                e.fail_count += 1;
            }
        }
        self.persist();
    }

    /// Drop an entry whose prerequisites are permanently gone.
    pub fn invalidate(&self, id: &str) {
        let removed = self.entries.lock().unwrap().remove(id).is_some();
        if removed {
            debug!(%id, "cache entry invalidated");
            self.persist();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort write-through.  A failed persist keeps serving from
    /// memory; the next mutation retries.
    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let file = {
            let entries = self.entries.lock().unwrap();
            CacheFile {
                entries: entries.values().cloned().collect(),
            }
        };
        let write = || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let text = serde_json::to_string_pretty(&file)?;
            std::fs::write(path, text)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!(path = %path.display(), "reload cache persist failed: {e}");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(content: &str) -> Fingerprint {
        Fingerprint::compute("main", None, content, &[])
    }

    fn toast(msg: &str) -> DesktopAction {
        DesktopAction::ToastShow { message: msg.into(), variant: None }
    }

    #[test]
    fn record_then_exact_lookup() {
        let cache = ReloadCache::in_memory(0.6, 3);
        let id = cache.record(fp("open notes"), vec![toast("hi")], "open notes", vec![]);

        let result = cache.lookup(&fp("open notes"));
        let exact = result.exact.expect("exact hit");
        assert_eq!(exact.id, id);
        assert_eq!(exact.actions.len(), 1);
    }

    #[test]
    fn fuzzy_candidates_are_ranked_and_capped() {
        let cache = ReloadCache::in_memory(0.5, 2);
        cache.record(fp("open the notes app"), vec![], "a", vec![]);
        cache.record(fp("open the notes app now"), vec![], "b", vec![]);
        cache.record(fp("open the calendar app"), vec![], "c", vec![]);

        let result = cache.lookup(&fp("open the notes app please"));
        assert!(result.exact.is_none());
        assert!(result.candidates.len() <= 2);
        for pair in result.candidates.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn below_threshold_is_not_offered() {
        let cache = ReloadCache::in_memory(0.9, 3);
        cache.record(fp("completely different text"), vec![], "x", vec![]);
        let result = cache.lookup(&fp("open notes"));
        assert!(result.exact.is_none());
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn counters_update() {
        let cache = ReloadCache::in_memory(0.6, 3);
        let id = cache.record(fp("open notes"), vec![], "n", vec![]);
        cache.mark_used(&id);
        cache.mark_used(&id);
        cache.mark_failed(&id);
        let e = cache.get(&id).unwrap();
        assert_eq!(e.use_count, 2);
        assert_eq!(e.fail_count, 1);
        assert!(e.last_used_at.is_some());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = ReloadCache::in_memory(0.6, 3);
        let id = cache.record(fp("open notes"), vec![], "n", vec![]);
        cache.invalidate(&id);
        assert!(cache.get(&id).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn persists_and_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reload-cache.json");

        let cache = ReloadCache::open(path.clone(), 0.6, 3);
        let id = cache.record(
            fp("open notes"),
            vec![toast("hello")],
            "open notes",
            vec!["w1".into()],
        );
        cache.mark_used(&id);

        let reloaded = ReloadCache::open(path, 0.6, 3);
        let e = reloaded.get(&id).expect("entry survives restart");
        assert_eq!(e.use_count, 1);
        assert_eq!(e.required_window_ids, vec!["w1".to_string()]);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reload-cache.json");
        std::fs::write(&path, "{ not json").unwrap();
        let cache = ReloadCache::open(path, 0.6, 3);
        assert!(cache.is_empty());
    }
}
