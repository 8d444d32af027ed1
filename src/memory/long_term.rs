//! Long-term memory: a capped, deduplicated list of text facts.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Maximum number of retained facts; oldest is evicted on overflow.
pub const LONG_TERM_CAPACITY: usize = 100;

/// Append-only deduplicated fact store, persisted as a JSON string array.
#[derive(Debug)]
pub struct LongTermMemory {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    memories: VecDeque<String>,
    path: PathBuf,
    capacity: usize,
}

impl LongTermMemory {
    /// Open the store at `path`, loading existing facts if the file exists.
    ///
    /// A corrupt or unreadable file is logged and the store starts fresh.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with_capacity(path, LONG_TERM_CAPACITY)
    }

    /// Open with an explicit capacity (tests use small caps).
    pub fn open_with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let mut memories = VecDeque::new();
        match load_facts(&path) {
            Ok(Some(facts)) => {
                info!("long-term memory loaded from {} ({} facts)", path.display(), facts.len());
                memories.extend(facts);
            }
            Ok(None) => info!("no long-term memory file at {}; starting fresh", path.display()),
            Err(e) => warn!("failed to load long-term memory: {e}; starting fresh"),
        }
        while memories.len() > capacity {
            memories.pop_front();
        }
        Self {
            inner: Mutex::new(MemoryInner {
                memories,
                path,
                capacity: capacity.max(1),
            }),
        }
    }

    /// Insert a fact.
    ///
    /// Idempotent: a fact already present (exact string match) is a no-op
    /// and the on-disk file is untouched. Returns whether the fact was new.
    pub fn insert(&self, fact: &str) -> bool {
        let fact = fact.trim();
        if fact.is_empty() {
            return false;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.memories.iter().any(|m| m == fact) {
            return false;
        }
        if inner.memories.len() >= inner.capacity {
            inner.memories.pop_front();
        }
        inner.memories.push_back(fact.to_owned());
        info!("added long-term memory: '{fact}'");
        persist(&inner.path, &inner.memories);
        true
    }

    /// All facts, oldest first.
    pub fn all(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.memories.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Render the facts for prompt assembly as a bulleted list.
    pub fn formatted(&self) -> String {
        let Ok(inner) = self.inner.lock() else {
            return String::new();
        };
        if inner.memories.is_empty() {
            return "No long-term memories yet.".to_owned();
        }
        inner
            .memories
            .iter()
            .map(|m| format!("- {m}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of stored facts.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.memories.len())
            .unwrap_or(0)
    }

    /// Whether the store holds no facts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_facts(path: &Path) -> std::io::Result<Option<Vec<String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map(Some)
        .map_err(std::io::Error::other)
}

/// Write the store to disk. Failures are logged, never propagated: the
/// in-memory state stays authoritative and the next mutation retries.
fn persist(path: &Path, memories: &VecDeque<String>) {
    let facts: Vec<&String> = memories.iter().collect();
    let json = match serde_json::to_string_pretty(&facts) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to serialize long-term memory: {e}");
            return;
        }
    };
    if let Err(e) = std::fs::write(path, json) {
        warn!("failed to save long-term memory to {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn insert_is_idempotent_in_memory_and_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ltm.json");
        let store = LongTermMemory::open(&path);

        assert!(store.insert("user likes pizza"));
        let first_bytes = std::fs::read(&path).unwrap();

        assert!(!store.insert("user likes pizza"));
        let second_bytes = std::fs::read(&path).unwrap();

        assert!(store.len() == 1);
        assert!(first_bytes == second_bytes);
    }

    #[test]
    fn persist_load_persist_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ltm.json");

        let store = LongTermMemory::open(&path);
        store.insert("user name is Kim");
        store.insert("user likes pizza");
        let before = std::fs::read(&path).unwrap();

        let reloaded = LongTermMemory::open(&path);
        assert!(reloaded.all() == vec!["user name is Kim", "user likes pizza"]);
        // Re-persist by inserting and rolling back via a fresh file copy:
        // inserting a duplicate must not rewrite the file at all.
        assert!(!reloaded.insert("user likes pizza"));
        let after = std::fs::read(&path).unwrap();
        assert!(before == after);
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ltm.json");
        let store = LongTermMemory::open_with_capacity(&path, 3);

        for i in 0..5 {
            assert!(store.insert(&format!("fact {i}")));
        }
        assert!(store.all() == vec!["fact 2", "fact 3", "fact 4"]);
    }

    #[test]
    fn reinserting_distinct_facts_caps_at_n() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ltm.json");
        let store = LongTermMemory::open_with_capacity(&path, 10);

        for i in 0..6 {
            store.insert(&format!("fact {i}"));
        }
        for i in 0..6 {
            store.insert(&format!("fact {i}"));
        }
        assert!(store.len() == 6);
    }

    #[test]
    fn formatted_bullets_or_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let store = LongTermMemory::open(dir.path().join("ltm.json"));
        assert!(store.formatted() == "No long-term memories yet.");

        store.insert("user name is Kim");
        assert!(store.formatted() == "- user name is Kim");
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ltm.json");
        std::fs::write(&path, "not json").unwrap();

        let store = LongTermMemory::open(&path);
        assert!(store.is_empty());
        assert!(store.insert("fact"));
    }
}
