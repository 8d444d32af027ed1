//! Rolling live-chat window with a previous/recent watermark.
//!
//! The window holds the last N chat lines in arrival order. Each response
//! splits the window into lines already seen by a prior response and lines
//! that arrived since; the split and the watermark advance happen under one
//! lock so the pipeline always sees a consistent snapshot.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// One live-chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    /// Viewer nickname.
    pub user: String,
    /// Chat message text.
    pub message: String,
}

impl ChatLine {
    /// Build a chat line.
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.user, self.message)
    }
}

/// Bounded rolling window of recent chat lines.
#[derive(Debug)]
pub struct ChatWindow {
    inner: Mutex<WindowInner>,
}

#[derive(Debug)]
struct WindowInner {
    /// Lines paired with an absolute arrival sequence number.
    ///
    /// Sequence numbers survive eviction, so the seen watermark stays
    /// correct even when old lines have rolled off.
    lines: VecDeque<(u64, ChatLine)>,
    next_seq: u64,
    /// First arrival sequence not yet seen by a response.
    seen_watermark: u64,
    capacity: usize,
}

impl ChatWindow {
    /// Create a window holding at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(WindowInner {
                lines: VecDeque::with_capacity(capacity),
                next_seq: 0,
                seen_watermark: 0,
                capacity: capacity.max(1),
            }),
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&self, line: ChatLine) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if inner.lines.len() >= inner.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back((seq, line));
    }

    /// Split the window into (previous, recent) at the seen watermark and
    /// advance the watermark past every line currently held.
    ///
    /// `previous` are lines a prior response already saw; `recent` are new
    /// since then. Together they equal the window snapshot at call time.
    pub fn split_and_advance(&self) -> (Vec<ChatLine>, Vec<ChatLine>) {
        let Ok(mut inner) = self.inner.lock() else {
            return (Vec::new(), Vec::new());
        };
        let watermark = inner.seen_watermark;
        let mut previous = Vec::new();
        let mut recent = Vec::new();
        for (seq, line) in &inner.lines {
            if *seq < watermark {
                previous.push(line.clone());
            } else {
                recent.push(line.clone());
            }
        }
        inner.seen_watermark = inner.next_seq;
        (previous, recent)
    }

    /// Copy of the current window contents, oldest first.
    pub fn snapshot(&self) -> Vec<ChatLine> {
        self.inner
            .lock()
            .map(|inner| inner.lines.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of lines currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.lines.len()).unwrap_or(0)
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
