//! Input/output event records, response tokens, and the interaction clock.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{Duration, Instant};

/// Where an input event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// A transcribed microphone utterance.
    Speech,
    /// A live-chat line that passed the response gate.
    Chat,
    /// The idle timer fired.
    Idle,
}

/// A single decision candidate posted to the arbiter mailbox.
#[derive(Debug, Clone)]
pub struct InputEvent {
    /// Input source kind.
    pub source: InputSource,
    /// Speaker nickname (empty for idle events).
    pub speaker: String,
    /// Utterance or chat text (empty for idle events).
    pub text: String,
    /// Monotonic timestamp at which the producer posted the event.
    pub received_at: Instant,
    /// Set by the arbiter when this event preempted an active response.
    /// Producers always post with `false`.
    pub is_interruption: bool,
}

impl InputEvent {
    /// Build a speech event for a transcribed utterance.
    pub fn speech(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: InputSource::Speech,
            speaker: speaker.into(),
            text: text.into(),
            received_at: Instant::now(),
            is_interruption: false,
        }
    }

    /// Build a chat event for a live-chat line.
    pub fn chat(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: InputSource::Chat,
            speaker: speaker.into(),
            text: text.into(),
            received_at: Instant::now(),
            is_interruption: false,
        }
    }

    /// Build an idle-timer event.
    pub fn idle() -> Self {
        Self {
            source: InputSource::Idle,
            speaker: String::new(),
            text: String::new(),
            received_at: Instant::now(),
            is_interruption: false,
        }
    }
}

/// Opaque identity of one response, from acceptance through playback.
///
/// The sequence number is the authoritative order; the tag only exists so
/// log lines stay readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseToken {
    /// Strictly increasing sequence number (authoritative).
    pub seq: u64,
    /// 8-character random tag for logging.
    pub tag: String,
}

impl fmt::Display for ResponseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tag, self.seq)
    }
}

/// Issues response tokens with strictly increasing sequence numbers.
#[derive(Debug, Default)]
pub struct TokenIssuer {
    next_seq: AtomicU64,
}

impl TokenIssuer {
    /// Create a new issuer starting at sequence 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token.
    pub fn issue(&self) -> ResponseToken {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut tag = uuid::Uuid::new_v4().simple().to_string();
        tag.truncate(8);
        ResponseToken { seq, tag }
    }
}

/// What the pipeline is audibly doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SpeakingState {
    /// No response in flight.
    Idle = 0,
    /// A response is being generated or synthesized.
    Synthesizing = 1,
    /// Audio is being streamed to the sink.
    Playing = 2,
}

impl SpeakingState {
    /// Decode from the atomic representation.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Synthesizing,
            2 => Self::Playing,
            _ => Self::Idle,
        }
    }
}

/// Record of a response cancelled by user speech, produced by the arbiter
/// and consumed once by the next pipeline run.
#[derive(Debug, Clone)]
pub struct InterruptionRecord {
    /// Token of the cancelled response.
    pub interrupted: ResponseToken,
    /// Speaker whose utterance caused the preemption.
    pub by_speaker: String,
    /// The preempting utterance.
    pub by_text: String,
    /// When the preemption happened.
    pub at: Instant,
}

/// Monotonic tracker of the most recent interaction.
///
/// An interaction is an accepted non-idle event or the end of playback;
/// while playback is active the clock is touched continuously so idle
/// chatter never fires during speech.
#[derive(Debug)]
pub struct InteractionClock {
    last: Mutex<Instant>,
}

impl InteractionClock {
    /// Create a clock whose last interaction is "now".
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Reset the last-interaction time to "now".
    pub fn touch(&self) {
        if let Ok(mut last) = self.last.lock() {
            *last = Instant::now();
        }
    }

    /// Time elapsed since the last interaction.
    pub fn idle_for(&self) -> Duration {
        self.last
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for InteractionClock {
    fn default() -> Self {
        Self::new()
    }
}
