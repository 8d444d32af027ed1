//! Contracts for the external collaborators.
//!
//! Everything the core talks to (recognizer, chat source, language model,
//! synthesizer, audio sink, avatar) sits behind one of these narrow
//! traits. Implementations are injected at construction and the core never
//! sees past the trait.

use crate::audio::AudioFormat;
use crate::chat::ChatLine;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callback invoked once per completed utterance: `(speaker, text)`.
///
/// Must be callable concurrently from any thread.
pub type TranscriptCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Callback receiving normalized per-chunk loudness in `[0, 1]`.
pub type LoudnessCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Declared shape of a tool the language model may call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    /// Tool name the model must use.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON schema of the tool arguments.
    pub parameters: serde_json::Value,
}

/// A parsed tool invocation returned by the language model.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    /// Name of the invoked tool.
    pub name: String,
    /// Parsed argument object.
    pub args: serde_json::Value,
}

/// Language model adapter. Each method is a single request/response.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a reply for a fully assembled prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Produce a one-sentence factual summary of `text`.
    async fn summarize(&self, text: &str) -> Result<String>;

    /// Generate with tool calling; the adapter parses and returns every
    /// tool invocation the model made.
    async fn generate_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSchema],
    ) -> Result<Vec<ToolCall>>;
}

/// Live-chat source adapter.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Fetch up to `limit` most-recent chat lines, newest first.
    async fn fetch_latest(&self, limit: usize) -> Result<Vec<ChatLine>>;
}

/// Stream of synthesized audio chunks.
///
/// The first chunk is a complete WAV file (header plus initial frames);
/// subsequent chunks are raw PCM frames in the same format.
pub type AudioChunkStream = mpsc::Receiver<Bytes>;

/// Speech synthesizer adapter.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesizing `text`, returning the chunk stream.
    async fn synthesize(&self, text: &str) -> Result<AudioChunkStream>;
}

/// Speech recognizer adapter. The recognizer owns its own capture threads
/// and fires the callback once per completed utterance.
pub trait SpeechRecognizer: Send + Sync {
    /// Start recognizing, delivering utterances to `on_transcribed`.
    fn start(&self, on_transcribed: TranscriptCallback) -> Result<()>;

    /// Stop recognizing. Safe to call when not started.
    fn stop(&self);

    /// Swap the active input devices (`id → label`). Safe at any time.
    fn change_devices(&self, devices: &HashMap<String, String>) -> Result<()>;
}

/// Audio sink adapter: plays streamed PCM, reports playing/idle, and emits
/// per-chunk loudness to a registered callback.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Open a playback stream for the given format.
    async fn open(&self, format: AudioFormat) -> Result<()>;

    /// Play one chunk of interleaved 16-bit samples.
    async fn write(&self, samples: &[i16]) -> Result<()>;

    /// Drain buffered audio and end the stream cleanly.
    async fn close(&self) -> Result<()>;

    /// Preemptively stop playback, discarding buffered audio.
    /// Safe to call when idle.
    fn stop(&self);

    /// Whether audio is currently being played.
    fn is_playing(&self) -> bool;

    /// Route playback to a different output device (None = default).
    fn set_output_device(&self, device: Option<String>) -> Result<()>;

    /// Register the per-chunk loudness callback.
    fn on_chunk_loudness(&self, callback: LoudnessCallback);
}

/// Avatar controller: receives mouth-open values in `[0, 1]`.
pub trait AvatarController: Send + Sync {
    /// Drive the avatar mouth. Called from the sink's loudness callback.
    fn set_mouth_open(&self, value: f32);
}
