//! Thread-safe state view for the external dashboard.
//!
//! The dashboard never touches core state directly; it reads a cheap
//! snapshot assembled from atomics and short-lived locks.

use crate::chat::{ChatLine, ChatWindow};
use crate::events::SpeakingState;
use crate::pipeline::ResponseGate;
use std::sync::{Arc, Mutex};

/// Shared write handle for status updates plus the snapshot reader.
pub struct Dashboard {
    status: Mutex<String>,
    last_prompt: Mutex<String>,
    gate: Arc<ResponseGate>,
    window: Arc<ChatWindow>,
}

/// A point-in-time copy of the externally visible state.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    /// Human-readable status line.
    pub status: String,
    /// Published speaking state.
    pub speaking: SpeakingState,
    /// Display form of the current response token, if any.
    pub current_response: Option<String>,
    /// The most recent fully assembled prompt.
    pub last_prompt: String,
    /// Copy of the rolling chat window, oldest first.
    pub recent_chats: Vec<ChatLine>,
}

impl Dashboard {
    /// Create a dashboard over the shared gate and chat window.
    pub fn new(gate: Arc<ResponseGate>, window: Arc<ChatWindow>) -> Self {
        Self {
            status: Mutex::new("Initializing...".to_owned()),
            last_prompt: Mutex::new(String::new()),
            gate,
            window,
        }
    }

    /// Update the status line.
    pub fn set_status(&self, status: impl Into<String>) {
        if let Ok(mut guard) = self.status.lock() {
            *guard = status.into();
        }
    }

    /// Record the most recent assembled prompt.
    pub fn set_last_prompt(&self, prompt: String) {
        if let Ok(mut guard) = self.last_prompt.lock() {
            *guard = prompt;
        }
    }

    /// Take a snapshot of the externally visible state.
    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            status: self.status.lock().map(|g| g.clone()).unwrap_or_default(),
            speaking: self.gate.state(),
            current_response: self.gate.current().map(|t| t.to_string()),
            last_prompt: self
                .last_prompt
                .lock()
                .map(|g| g.clone())
                .unwrap_or_default(),
            recent_chats: self.window.snapshot(),
        }
    }
}

/// Truncate `text` to at most `max_chars` characters for log/status lines.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::events::TokenIssuer;

    #[test]
    fn snapshot_reflects_gate_and_window() {
        let gate = Arc::new(ResponseGate::new());
        let window = Arc::new(ChatWindow::new(5));
        let dashboard = Dashboard::new(Arc::clone(&gate), Arc::clone(&window));

        window.push(ChatLine::new("Alice", "hi"));
        let token = TokenIssuer::new().issue();
        gate.begin(&token);
        gate.set_state(SpeakingState::Playing);
        dashboard.set_status("Speaking: 'hi'");

        let snapshot = dashboard.snapshot();
        assert!(snapshot.speaking == SpeakingState::Playing);
        assert!(snapshot.current_response.unwrap() == token.to_string());
        assert!(snapshot.status == "Speaking: 'hi'");
        assert!(snapshot.recent_chats.len() == 1);
    }

    #[test]
    fn preview_truncates_long_text() {
        assert!(preview("short", 30) == "short");
        let long = "x".repeat(40);
        let p = preview(&long, 30);
        assert!(p.chars().count() == 33);
        assert!(p.ends_with("..."));
    }
}
