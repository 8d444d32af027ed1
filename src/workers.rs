//! Background workers: chat polling, idle chatter, and memory distillation.
//!
//! Each worker is a cooperative loop driven by its own interval; an error
//! is logged and followed by a backoff sleep so a flaky external service
//! never kills the worker.

use crate::arbiter::Mailbox;
use crate::chat::{ChatLine, ChatWindow};
use crate::config::{ChatConfig, IdleConfig};
use crate::events::{InputEvent, InteractionClock};
use crate::history::ConversationHistory;
use crate::memory::{CoreMemoryStore, Importance, LongTermMemory};
use crate::pipeline::ResponseGate;
use crate::services::{AudioSink, ChatSource, LanguageModel, ToolCall, ToolSchema};
use crate::snapshot::{Dashboard, preview};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{Duration, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backoff after a worker error before the next attempt.
const WORKER_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Cadence of idle-time checks.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Tool the distiller exposes to the language model.
pub const SAVE_CORE_MEMORY_TOOL: &str = "save_core_memory";

async fn backoff(cancel: &CancellationToken) {
    tokio::select! {
        () = cancel.cancelled() => {}
        () = sleep(WORKER_RETRY_DELAY) => {}
    }
}

/// Shared state for the chat poller.
pub struct ChatPollerControl {
    /// Chat source adapter.
    pub source: Arc<dyn ChatSource>,
    /// Rolling chat window; every fetched line lands here.
    pub window: Arc<ChatWindow>,
    /// Mailbox for lines that pass the response gate.
    pub mailbox: Mailbox,
    /// Chat settings (interval, limit, response chance).
    pub config: ChatConfig,
    /// Shutdown signal.
    pub cancel: CancellationToken,
}

/// Poll the chat source, diff against the previous poll, and feed new
/// lines into the window (always) and the mailbox (gated by a Bernoulli
/// trial on `response_chance`).
pub async fn run_chat_poller(ctl: ChatPollerControl) {
    info!("chat poller started");
    let poll_interval = Duration::from_secs(ctl.config.poll_interval_s.max(1));
    let fetch_timeout = Duration::from_secs(ctl.config.fetch_timeout_s.max(1));
    let mut last: Vec<ChatLine> = Vec::new();

    loop {
        tokio::select! {
            () = ctl.cancel.cancelled() => break,
            () = sleep(poll_interval) => {}
        }

        let latest = match timeout(
            fetch_timeout,
            ctl.source.fetch_latest(ctl.config.max_recent_chats),
        )
        .await
        {
            Ok(Ok(latest)) => latest,
            Ok(Err(e)) => {
                warn!("chat poll failed: {e}");
                backoff(&ctl.cancel).await;
                continue;
            }
            Err(_) => {
                warn!("chat poll timed out after {}s", fetch_timeout.as_secs());
                backoff(&ctl.cancel).await;
                continue;
            }
        };

        // The source returns newest first; keep lines we haven't seen and
        // emit them in chronological order.
        let fresh: Vec<ChatLine> = latest
            .iter()
            .filter(|line| !last.contains(line))
            .cloned()
            .collect();
        if !fresh.is_empty() {
            debug!("found {} new chat lines", fresh.len());
        }
        for line in fresh.iter().rev() {
            ctl.window.push(line.clone());
            let roll: f64 = rand::random();
            if roll < ctl.config.response_chance {
                debug!("chat line from '{}' passed the response gate", line.user);
                ctl.mailbox
                    .post(InputEvent::chat(line.user.clone(), line.message.clone()));
            }
        }
        last = latest;
    }
    info!("chat poller stopped");
}

/// Shared state for the idle timer.
pub struct IdleTimerControl {
    /// Mailbox for idle events.
    pub mailbox: Mailbox,
    /// Current-response gate (idle never fires while a response is active).
    pub gate: Arc<ResponseGate>,
    /// Audio sink; active playback continuously resets the idle clock.
    pub sink: Arc<dyn AudioSink>,
    /// Last-interaction clock.
    pub clock: Arc<InteractionClock>,
    /// Idle settings.
    pub config: IdleConfig,
    /// Dashboard state view.
    pub dashboard: Arc<Dashboard>,
    /// Shutdown signal.
    pub cancel: CancellationToken,
}

/// Fire at most one idle event once quiet time exceeds a per-cycle random
/// threshold in `[min_interval_s, max_interval_s]`.
pub async fn run_idle_timer(ctl: IdleTimerControl) {
    info!("idle timer started");
    let min = ctl.config.min_interval_s as f64;
    let max = (ctl.config.max_interval_s.max(ctl.config.min_interval_s)) as f64;

    loop {
        tokio::select! {
            () = ctl.cancel.cancelled() => break,
            () = sleep(IDLE_CHECK_INTERVAL) => {}
        }

        if ctl.sink.is_playing() {
            ctl.clock.touch();
            continue;
        }

        let threshold = Duration::from_secs_f64(rand::thread_rng().gen_range(min..=max));
        if ctl.clock.idle_for() > threshold
            && ctl.mailbox.backlog() == 0
            && !ctl.gate.is_active()
        {
            info!("idle for over {:.0}s; prompting autonomous chatter", threshold.as_secs_f64());
            ctl.dashboard.set_status("Idle. Thinking of something to say...");
            ctl.mailbox.post(InputEvent::idle());
            ctl.clock.touch();
        }
    }
    info!("idle timer stopped");
}

/// Shared state for the session summarizer.
pub struct SummarizerControl {
    /// Language model adapter.
    pub llm: Arc<dyn LanguageModel>,
    /// Conversation history to summarize.
    pub history: Arc<ConversationHistory>,
    /// Long-term store receiving summaries.
    pub long_term: Arc<LongTermMemory>,
    /// Dashboard state view.
    pub dashboard: Arc<Dashboard>,
    /// Seconds between summarization passes.
    pub interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Shutdown signal.
    pub cancel: CancellationToken,
}

/// Periodically distill the conversation history into one-sentence facts.
pub async fn run_session_summarizer(ctl: SummarizerControl) {
    info!("session summarizer started");
    loop {
        tokio::select! {
            () = ctl.cancel.cancelled() => break,
            () = sleep(ctl.interval) => {}
        }

        if ctl.history.is_empty() {
            continue;
        }

        ctl.dashboard
            .set_status("Summarizing conversation for long-term memory...");
        let text = ctl.history.formatted();
        match timeout(ctl.request_timeout, ctl.llm.summarize(&text)).await {
            Ok(Ok(summary)) => {
                let summary = summary.trim();
                if !summary.is_empty() && ctl.long_term.insert(summary) {
                    info!("added summary to memory: {}", preview(summary, 50));
                }
            }
            Ok(Err(e)) => {
                warn!("session summarization failed: {e}");
                backoff(&ctl.cancel).await;
            }
            Err(_) => {
                warn!("session summarization timed out");
                backoff(&ctl.cancel).await;
            }
        }
        ctl.dashboard.set_status("Waiting for input.");
    }
    info!("session summarizer stopped");
}

/// Shared state for the core-memory distiller.
pub struct DistillerControl {
    /// Language model adapter (tool calling).
    pub llm: Arc<dyn LanguageModel>,
    /// Long-term facts being distilled.
    pub long_term: Arc<LongTermMemory>,
    /// Core store receiving distilled entries.
    pub core: Arc<CoreMemoryStore>,
    /// Dashboard state view.
    pub dashboard: Arc<Dashboard>,
    /// Seconds between distillation passes.
    pub interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Shutdown signal.
    pub cancel: CancellationToken,
}

/// Periodically ask the model to pick out the most important long-term
/// facts via the `save_core_memory` tool.
pub async fn run_core_memory_distiller(ctl: DistillerControl) {
    info!("core-memory distiller started");
    loop {
        tokio::select! {
            () = ctl.cancel.cancelled() => break,
            () = sleep(ctl.interval) => {}
        }

        if ctl.long_term.is_empty() {
            debug!("no long-term memories to distill");
            continue;
        }

        ctl.dashboard.set_status("Processing core memories...");
        let prompt = distillation_prompt(&ctl.long_term.formatted());
        let tools = vec![save_core_memory_schema()];
        match timeout(
            ctl.request_timeout,
            ctl.llm.generate_with_tools(&prompt, &tools),
        )
        .await
        {
            Ok(Ok(calls)) => {
                let mut saved = 0usize;
                for call in &calls {
                    if apply_save_call(&ctl.core, call) {
                        saved += 1;
                    }
                }
                info!(
                    "core-memory distillation saved {saved} entries (store holds {})",
                    ctl.core.len()
                );
            }
            Ok(Err(e)) => {
                warn!("core-memory distillation failed: {e}");
                backoff(&ctl.cancel).await;
            }
            Err(_) => {
                warn!("core-memory distillation timed out");
                backoff(&ctl.cancel).await;
            }
        }
        ctl.dashboard.set_status("Waiting for input.");
    }
    info!("core-memory distiller stopped");
}

/// Declared shape of the `save_core_memory` tool.
pub fn save_core_memory_schema() -> ToolSchema {
    ToolSchema {
        name: SAVE_CORE_MEMORY_TOOL.to_owned(),
        description: "Save an important core memory that should be remembered for a very long time"
            .to_owned(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "memory_text": {
                    "type": "string",
                    "description": "A concise summary of the important memory to save"
                },
                "importance_level": {
                    "type": "string",
                    "enum": ["critical", "high", "medium"],
                    "description": "The importance level of this memory"
                },
                "category": {
                    "type": "string",
                    "description": "Category of the memory (e.g., 'user_preference', 'personal_info', 'important_event', 'relationship', 'context')"
                }
            },
            "required": ["memory_text", "importance_level", "category"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct SaveCoreMemoryArgs {
    memory_text: String,
    importance_level: Importance,
    #[serde(default = "default_category")]
    category: String,
}

fn default_category() -> String {
    "context".to_owned()
}

/// Dispatch one parsed tool call to the core store. Returns whether an
/// entry was saved.
pub fn apply_save_call(core: &CoreMemoryStore, call: &ToolCall) -> bool {
    if call.name != SAVE_CORE_MEMORY_TOOL {
        warn!("ignoring unknown tool call '{}'", call.name);
        return false;
    }
    let args: SaveCoreMemoryArgs = match serde_json::from_value(call.args.clone()) {
        Ok(args) => args,
        Err(e) => {
            warn!("malformed {SAVE_CORE_MEMORY_TOOL} arguments: {e}");
            return false;
        }
    };
    if args.memory_text.trim().is_empty() {
        return false;
    }
    core.insert(args.memory_text.trim(), args.importance_level, &args.category);
    true
}

fn distillation_prompt(facts: &str) -> String {
    format!(
        "You are analyzing long-term memories to identify the most important \
         information that should be preserved as core memories.\n\n\
         Analyze the following long-term memories:\n\n{facts}\n\n\
         Look for:\n\
         1. Important user preferences or personality traits\n\
         2. Significant personal information about the user\n\
         3. Critical relationship details\n\
         4. Important events or milestones\n\
         5. Key context that affects how you should interact with the user\n\n\
         For each piece of information important enough to be a core memory, \
         call the {SAVE_CORE_MEMORY_TOOL} function to save it.\n\n\
         Guidelines:\n\
         - Only save truly important information\n\
         - Summarize concisely but preserve key details\n\
         - Choose appropriate importance levels (critical, high, medium)\n\
         - Categorize memories appropriately\n\
         - Don't save duplicate or redundant information"
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn tool_schema_declares_required_fields() {
        let schema = save_core_memory_schema();
        assert!(schema.name == SAVE_CORE_MEMORY_TOOL);
        let required = schema.parameters["required"].as_array().unwrap();
        assert!(required.len() == 3);
        assert!(schema.parameters["properties"]["importance_level"]["enum"][0] == "critical");
    }

    #[test]
    fn save_call_appends_entry() {
        let dir = tempfile::tempdir().unwrap();
        let core = CoreMemoryStore::open(dir.path().join("core.json"));
        let call = ToolCall {
            name: SAVE_CORE_MEMORY_TOOL.to_owned(),
            args: serde_json::json!({
                "memory_text": "user name is Kim",
                "importance_level": "high",
                "category": "personal_info"
            }),
        };

        assert!(apply_save_call(&core, &call));
        let entries = core.entries();
        assert!(entries.len() == 1);
        assert!(entries[0].text == "user name is Kim");
        assert!(entries[0].importance == Importance::High);
        assert!(entries[0].category == "personal_info");
    }

    #[test]
    fn unknown_tool_and_bad_args_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let core = CoreMemoryStore::open(dir.path().join("core.json"));

        let wrong_name = ToolCall {
            name: "delete_everything".to_owned(),
            args: serde_json::json!({}),
        };
        assert!(!apply_save_call(&core, &wrong_name));

        let bad_importance = ToolCall {
            name: SAVE_CORE_MEMORY_TOOL.to_owned(),
            args: serde_json::json!({
                "memory_text": "x",
                "importance_level": "extreme"
            }),
        };
        assert!(!apply_save_call(&core, &bad_importance));
        assert!(core.is_empty());
    }

    #[test]
    fn missing_category_defaults_to_context() {
        let dir = tempfile::tempdir().unwrap();
        let core = CoreMemoryStore::open(dir.path().join("core.json"));
        let call = ToolCall {
            name: SAVE_CORE_MEMORY_TOOL.to_owned(),
            args: serde_json::json!({
                "memory_text": "user streams on weekends",
                "importance_level": "medium"
            }),
        };

        assert!(apply_save_call(&core, &call));
        assert!(core.entries()[0].category == "context");
    }

    #[test]
    fn distillation_prompt_embeds_facts() {
        let prompt = distillation_prompt("- user likes pizza\n- user name is Kim");
        assert!(prompt.contains("- user likes pizza"));
        assert!(prompt.contains(SAVE_CORE_MEMORY_TOOL));
    }
}
