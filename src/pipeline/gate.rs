//! The response gate: single owner of "which response is current".
//!
//! The gate holds the current [`ResponseToken`] and the published
//! [`SpeakingState`]. Dashboard and pipeline read both through word-sized
//! atomics; writes go through the inner mutex so acceptance, cancellation,
//! and completion serialize. Cancellation is expressed purely as a token
//! change: any stage holding a token that no longer matches must drop its
//! work at the next boundary.

use crate::events::{ResponseToken, SpeakingState};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Shared current-response identity and speaking state.
#[derive(Debug)]
pub struct ResponseGate {
    /// Sequence number of the current token; 0 = none. Mirrors `inner`
    /// for lock-free mismatch checks on hot paths.
    current_seq: AtomicU64,
    /// Published [`SpeakingState`].
    state: AtomicU8,
    inner: Mutex<Option<ResponseToken>>,
}

impl ResponseGate {
    /// Create an idle gate.
    pub fn new() -> Self {
        Self {
            current_seq: AtomicU64::new(0),
            state: AtomicU8::new(SpeakingState::Idle as u8),
            inner: Mutex::new(None),
        }
    }

    /// Install `token` as the current response (arbiter, at acceptance).
    pub fn begin(&self, token: &ResponseToken) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner = Some(token.clone());
            self.current_seq.store(token.seq, Ordering::Release);
        }
    }

    /// Cancel the current response, returning its token.
    ///
    /// The token is cleared before the caller records any interruption
    /// bookkeeping, and the speaking state drops to idle; stale stages
    /// notice through token mismatch.
    pub fn cancel_current(&self) -> Option<ResponseToken> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        let cancelled = inner.take();
        self.current_seq.store(0, Ordering::Release);
        self.state
            .store(SpeakingState::Idle as u8, Ordering::Release);
        cancelled
    }

    /// Clear the token after a clean finish. Returns false when the token
    /// was already superseded (the finish belongs to a cancelled response).
    pub fn finish(&self, token: &ResponseToken) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.as_ref().map(|t| t.seq) != Some(token.seq) {
            return false;
        }
        *inner = None;
        self.current_seq.store(0, Ordering::Release);
        self.state
            .store(SpeakingState::Idle as u8, Ordering::Release);
        true
    }

    /// Whether `token` is still the current response.
    pub fn is_current(&self, token: &ResponseToken) -> bool {
        self.current_seq.load(Ordering::Acquire) == token.seq
    }

    /// Whether any response is in flight.
    pub fn is_active(&self) -> bool {
        self.current_seq.load(Ordering::Acquire) != 0
    }

    /// Copy of the current token, if any.
    pub fn current(&self) -> Option<ResponseToken> {
        self.inner.lock().ok().and_then(|inner| inner.clone())
    }

    /// Publish a speaking state.
    pub fn set_state(&self, state: SpeakingState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Read the published speaking state.
    pub fn state(&self) -> SpeakingState {
        SpeakingState::from_u8(self.state.load(Ordering::Acquire))
    }
}

impl Default for ResponseGate {
    fn default() -> Self {
        Self::new()
    }
}
