//! Iris: real-time conversational orchestration for an AI virtual streamer.
//!
//! The core multiplexes three asynchronous input sources (microphone
//! speech, live-stream chat, an idle timer) into at most one in-flight
//! spoken response, and supports barge-in: the user speaking again
//! immediately preempts the response being played and triggers a new one
//! that knows it was interrupted.
//!
//! # Architecture
//!
//! Independent loops cooperate through bounded channels and atomic state:
//! - **Producers** (STT callback, chat poller, idle timer) post events to
//!   the arbiter mailbox
//! - **Arbiter**: accepts, drops, or preempts; owns the response token
//! - **Pipeline**: prompt assembly → LLM → TTS → audio sink, single-flight
//! - **Workers**: chat polling, idle chatter, memory summarization and
//!   core-memory distillation
//!
//! External collaborators (recognizer, chat source, language model,
//! synthesizer, sink, avatar) are injected behind the traits in
//! [`services`].

pub mod arbiter;
pub mod audio;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod history;
pub mod memory;
pub mod orchestrator;
pub mod pipeline;
pub mod services;
pub mod snapshot;
pub mod workers;

pub use config::StreamerConfig;
pub use error::{Result, StreamError};
pub use events::{InputEvent, InputSource, ResponseToken, SpeakingState};
pub use orchestrator::{Orchestrator, Services};
pub use snapshot::DashboardSnapshot;

/// Initialize tracing for embedders that don't set up their own
/// subscriber. Defaults to `iris=info`; override with `RUST_LOG`.
/// Safe to call more than once.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iris=info")),
        )
        .try_init();
}
