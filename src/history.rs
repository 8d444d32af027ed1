//! In-session conversation history.
//!
//! A fixed-capacity ring buffer of turns shared between the pipeline (which
//! appends) and the assembler/summarizer (which format it). History is
//! session-only and never persisted.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// Who produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The viewer or speaker addressed by a task prompt.
    User,
    /// The language model's spoken reply.
    Model,
    /// Out-of-band notes such as interruption records.
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
        };
        f.write_str(name)
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Entry author.
    pub role: Role,
    /// Entry text.
    pub text: String,
}

/// Bounded conversation history with oldest-first eviction.
#[derive(Debug)]
pub struct ConversationHistory {
    inner: Mutex<HistoryInner>,
}

#[derive(Debug)]
struct HistoryInner {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl ConversationHistory {
    /// Create a history retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HistoryInner {
                entries: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&self, role: Role, text: impl Into<String>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.entries.len() >= inner.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(HistoryEntry {
            role,
            text: text.into(),
        });
    }

    /// Render the history for prompt assembly, one `role: text` line per
    /// entry.
    pub fn formatted(&self) -> String {
        let Ok(inner) = self.inner.lock() else {
            return String::new();
        };
        if inner.entries.is_empty() {
            return "(No conversation history yet)".to_owned();
        }
        inner
            .entries
            .iter()
            .map(|e| format!("{}: {}", e.role, e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Copy of the entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.inner
            .lock()
            .map(|inner| inner.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.entries.len())
            .unwrap_or(0)
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
