//! Error types for the iris orchestration engine.

/// Top-level error type for the streamer core.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Speech recognizer error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Chat source error.
    #[error("chat error: {0}")]
    Chat(String),

    /// Language model request error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio device or playback stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Memory store persistence error.
    #[error("memory error: {0}")]
    Memory(String),

    /// Configuration error (missing required service, bad value).
    #[error("config error: {0}")]
    Config(String),

    /// Pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, StreamError>;
