//! Configuration types for the streamer core.
//!
//! Every section deserializes with `#[serde(default)]`, so partial configs
//! are fine and unknown keys are ignored. Missing keys take the documented
//! defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the conversational core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Speech recognition settings.
    pub stt: SttConfig,
    /// Live-chat intake settings.
    pub chat: ChatConfig,
    /// Idle-chatter trigger settings.
    pub idle: IdleConfig,
    /// Language model, prompt, and memory settings.
    pub llm: LlmConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Audio output settings.
    pub audio: AudioConfig,
}

/// Speech recognition settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Whether microphone speech input is enabled.
    pub enabled: bool,
}

/// Live-chat intake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Whether live-chat polling is enabled.
    pub enabled: bool,
    /// Seconds between chat polls.
    pub poll_interval_s: u64,
    /// Rolling chat window capacity (also the per-poll fetch limit).
    pub max_recent_chats: usize,
    /// Probability that a new chat line becomes a response candidate.
    ///
    /// Every line enters the rolling window regardless; this gate only
    /// decides whether the line is posted to the arbiter mailbox.
    pub response_chance: f64,
    /// Per-poll fetch timeout in seconds.
    pub fetch_timeout_s: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_s: 2,
            max_recent_chats: 20,
            response_chance: 0.3,
            fetch_timeout_s: 5,
        }
    }
}

/// Idle-chatter trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Whether autonomous idle chatter is enabled.
    pub enabled: bool,
    /// Lower bound of the random idle threshold, in seconds.
    pub min_interval_s: u64,
    /// Upper bound of the random idle threshold, in seconds.
    pub max_interval_s: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_s: 30,
            max_interval_s: 90,
        }
    }
}

/// Language model, prompt, and memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Maximum conversation-history entries retained (oldest evicted).
    pub max_history: usize,
    /// Path of the long-term memory JSON file.
    pub memory_path: PathBuf,
    /// Path of the core memory JSON file.
    pub core_memory_path: PathBuf,
    /// Whether the periodic session summarizer runs.
    pub enable_memory_summarization: bool,
    /// Seconds between session summarization passes.
    pub memory_summarize_interval_s: u64,
    /// Whether the periodic core-memory distiller runs.
    pub enable_core_memory_processing: bool,
    /// Seconds between core-memory distillation passes.
    pub core_memory_interval_s: u64,
    /// Persona text placed at the top of every assembled prompt.
    pub persona_prompt: String,
    /// Template for speech/chat task prompts.
    ///
    /// `{nickname}` and `{user_input}` are substituted with the speaker
    /// and their text.
    pub user_prompt_template: String,
    /// Task prompt used for idle-triggered responses.
    pub idle_prompt: String,
    /// Per-request generation timeout in seconds.
    pub request_timeout_s: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            memory_path: PathBuf::from("long_term_memory.json"),
            core_memory_path: PathBuf::from("core_memory.json"),
            enable_memory_summarization: false,
            memory_summarize_interval_s: 300,
            enable_core_memory_processing: false,
            core_memory_interval_s: 1800,
            persona_prompt: String::new(),
            user_prompt_template: "{nickname}: {user_input}".to_owned(),
            idle_prompt: "Say something interesting.".to_owned(),
            request_timeout_s: 30,
        }
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Timeout in seconds for opening a synthesis stream.
    pub open_timeout_s: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self { open_timeout_s: 10 }
    }
}

/// Audio output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = StreamerConfig::default();
        assert!(!config.stt.enabled);
        assert!(!config.chat.enabled);
        assert!(config.chat.poll_interval_s == 2);
        assert!(config.chat.max_recent_chats == 20);
        assert!((config.chat.response_chance - 0.3).abs() < f64::EPSILON);
        assert!(config.idle.min_interval_s == 30);
        assert!(config.idle.max_interval_s == 90);
        assert!(config.llm.max_history == 50);
        assert!(config.llm.memory_summarize_interval_s == 300);
        assert!(config.llm.core_memory_interval_s == 1800);
        assert!(config.llm.request_timeout_s == 30);
        assert!(config.tts.open_timeout_s == 10);
    }

    #[test]
    fn partial_config_with_unknown_keys_parses() {
        let json = r#"{
            "chat": { "enabled": true, "response_chance": 0.7, "widget_url": "ignored" },
            "llm": { "persona_prompt": "You are Iris.", "provider": "ignored" },
            "live2d": { "enabled": true }
        }"#;
        let config: StreamerConfig = serde_json::from_str(json).unwrap();
        assert!(config.chat.enabled);
        assert!((config.chat.response_chance - 0.7).abs() < f64::EPSILON);
        assert!(config.llm.persona_prompt == "You are Iris.");
        // Untouched sections keep their defaults.
        assert!(config.chat.poll_interval_s == 2);
        assert!(!config.idle.enabled);
    }
}
