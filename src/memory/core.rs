//! Core memory: structured important facts distilled from long-term memory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Importance level of a core memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    /// Must never be forgotten.
    Critical,
    /// Important long-term context.
    High,
    /// Useful but replaceable context.
    Medium,
}

/// One distilled core memory, persisted as
/// `{memory_text, importance_level, category, timestamp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreMemoryEntry {
    /// Concise fact text.
    #[serde(rename = "memory_text")]
    pub text: String,
    /// Importance level.
    #[serde(rename = "importance_level")]
    pub importance: Importance,
    /// Free-form category (e.g. `user_preference`, `personal_info`).
    pub category: String,
    /// Local creation time, `YYYY-MM-DD HH:MM:SS`.
    #[serde(rename = "timestamp")]
    pub created_at: String,
}

/// Persistent store of core memories.
///
/// Entries are appended as the distiller's tool handler fires; duplicates
/// are allowed (the distiller is asked, not forced, to avoid them).
#[derive(Debug)]
pub struct CoreMemoryStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    entries: Vec<CoreMemoryEntry>,
    path: PathBuf,
}

impl CoreMemoryStore {
    /// Open the store at `path`, loading existing entries if present.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(Some(entries)) => {
                info!("core memories loaded from {} ({} entries)", path.display(), entries.len());
                entries
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("failed to load core memories: {e}; starting fresh");
                Vec::new()
            }
        };
        Self {
            inner: Mutex::new(StoreInner { entries, path }),
        }
    }

    /// Append one core memory stamped with the current local time.
    pub fn insert(&self, text: &str, importance: Importance, category: &str) {
        let created_at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.insert_entry(CoreMemoryEntry {
            text: text.to_owned(),
            importance,
            category: category.to_owned(),
            created_at,
        });
    }

    /// Append a pre-stamped entry and persist.
    pub fn insert_entry(&self, entry: CoreMemoryEntry) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        info!(
            "saved core memory: {} ({:?}, {})",
            entry.text, entry.importance, entry.category
        );
        inner.entries.push(entry);
        persist(&inner.path, &inner.entries);
    }

    /// Summary grouped by importance, most important first; empty groups
    /// are skipped. Returns `None` when the store is empty so the prompt
    /// assembler can omit the whole section.
    pub fn summary(&self) -> Option<String> {
        let Ok(inner) = self.inner.lock() else {
            return None;
        };
        if inner.entries.is_empty() {
            return None;
        }
        let mut out = String::from("=== Core Memories ===");
        for (importance, header) in [
            (Importance::Critical, "Critical:"),
            (Importance::High, "High importance:"),
            (Importance::Medium, "Medium importance:"),
        ] {
            let group: Vec<&CoreMemoryEntry> = inner
                .entries
                .iter()
                .filter(|e| e.importance == importance)
                .collect();
            if group.is_empty() {
                continue;
            }
            out.push('\n');
            out.push_str(header);
            for entry in group {
                out.push_str(&format!("\n- {} ({})", entry.text, entry.category));
            }
        }
        Some(out)
    }

    /// Copy of all entries in insertion order.
    pub fn entries(&self) -> Vec<CoreMemoryEntry> {
        self.inner
            .lock()
            .map(|inner| inner.entries.clone())
            .unwrap_or_default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.entries.len())
            .unwrap_or(0)
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_entries(path: &Path) -> std::io::Result<Option<Vec<CoreMemoryEntry>>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map(Some)
        .map_err(std::io::Error::other)
}

fn persist(path: &Path, entries: &[CoreMemoryEntry]) {
    let json = match serde_json::to_string_pretty(entries) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to serialize core memories: {e}");
            return;
        }
    };
    if let Err(e) = std::fs::write(path, json) {
        warn!("failed to save core memories to {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn persists_with_spec_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.json");
        let store = CoreMemoryStore::open(&path);
        store.insert("user name is Kim", Importance::High, "personal_info");

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &parsed[0];
        assert!(entry["memory_text"] == "user name is Kim");
        assert!(entry["importance_level"] == "high");
        assert!(entry["category"] == "personal_info");

        let stamp = entry["timestamp"].as_str().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.json");
        let original = {
            let store = CoreMemoryStore::open(&path);
            store.insert("likes pizza", Importance::Medium, "user_preference");
            store.insert("allergic to cats", Importance::Critical, "personal_info");
            store.entries()
        };
        let before = std::fs::read(&path).unwrap();

        // Reload reproduces the entries exactly, and appending afterwards
        // keeps them intact.
        let reloaded = CoreMemoryStore::open(&path);
        assert!(reloaded.entries() == original);
        reloaded.insert_entry(original[0].clone());
        assert!(CoreMemoryStore::open(&path).len() == 3);

        // The first two entries survived the extra append untouched.
        let raw = std::fs::read(&path).unwrap();
        assert!(raw.len() > before.len());
    }

    #[test]
    fn summary_groups_by_importance_and_skips_empty_groups() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreMemoryStore::open(dir.path().join("core.json"));
        assert!(store.summary().is_none());

        store.insert("user name is Kim", Importance::High, "personal_info");
        store.insert("likes pizza", Importance::Medium, "user_preference");

        let summary = store.summary().unwrap();
        assert!(summary.contains("High importance:"));
        assert!(summary.contains("- user name is Kim (personal_info)"));
        assert!(summary.contains("Medium importance:"));
        assert!(!summary.contains("Critical:"));
    }

    #[test]
    fn duplicates_are_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreMemoryStore::open(dir.path().join("core.json"));
        store.insert("likes pizza", Importance::Medium, "user_preference");
        store.insert("likes pizza", Importance::Medium, "user_preference");
        assert!(store.len() == 2);
    }
}
