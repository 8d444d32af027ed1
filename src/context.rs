//! Prompt assembly.
//!
//! Builds the full model prompt from persona, wall-clock time, the two
//! memory stores, the split chat window, and the conversation history.
//! Section order is fixed so the prompt shape stays stable across turns;
//! empty sections carry a placeholder instead of disappearing.

use crate::chat::ChatLine;
use crate::config::LlmConfig;
use crate::events::{InputEvent, InputSource};
use crate::history::ConversationHistory;
use crate::memory::{CoreMemoryStore, LongTermMemory};
use std::sync::Arc;

/// A fully assembled prompt plus the short task prompt used for history
/// logging.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    /// The complete prompt sent to the model.
    pub full: String,
    /// The task line alone (logged as the user turn).
    pub task: String,
}

/// Assembles prompts from the shared conversation state.
pub struct ContextAssembler {
    persona: String,
    user_prompt_template: String,
    idle_prompt: String,
    long_term: Arc<LongTermMemory>,
    core: Arc<CoreMemoryStore>,
    history: Arc<ConversationHistory>,
}

impl ContextAssembler {
    /// Create an assembler over the shared stores.
    pub fn new(
        config: &LlmConfig,
        long_term: Arc<LongTermMemory>,
        core: Arc<CoreMemoryStore>,
        history: Arc<ConversationHistory>,
    ) -> Self {
        Self {
            persona: config.persona_prompt.clone(),
            user_prompt_template: config.user_prompt_template.clone(),
            idle_prompt: config.idle_prompt.clone(),
            long_term,
            core,
            history,
        }
    }

    /// The task prompt for an event: the configured idle line for idle
    /// events, otherwise the user template with speaker and text filled in.
    pub fn task_prompt(&self, event: &InputEvent) -> String {
        match event.source {
            InputSource::Idle => self.idle_prompt.clone(),
            InputSource::Speech | InputSource::Chat => self
                .user_prompt_template
                .replace("{nickname}", &event.speaker)
                .replace("{user_input}", &event.text),
        }
    }

    /// Assemble the full prompt for an accepted event and a chat-window
    /// split taken at assembly time.
    pub fn assemble(
        &self,
        event: &InputEvent,
        previous_chats: &[ChatLine],
        recent_chats: &[ChatLine],
    ) -> AssembledPrompt {
        let task = self.task_prompt(event);

        let now = chrono::Local::now();
        let datetime = format!(
            "{} ({})",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.format("%A")
        );

        let core_memory_info = match self.core.summary() {
            Some(summary) => {
                format!("\n# Core Memory (Most Important Information)\n{summary}\n")
            }
            None => String::new(),
        };

        let previous = format_chat_log(previous_chats, "(No previous chats)");
        let recent = format_chat_log(recent_chats, "(No recent chats)");

        let full = format!(
            "# System Persona\n{persona}\n\n\
             # Current Date and Time\n{datetime}\n\
             {core_memory_info}\
             # Long-Term Memory\n{memory}\n\n\
             # Previous Live Chat Log\n{previous}\n\n\
             # Conversation History\n{history}\n\n\
             # Recent Live Chat Log\n{recent}\n\n\
             # Current Task\n{task}\n",
            persona = self.persona,
            datetime = datetime,
            core_memory_info = core_memory_info,
            memory = self.long_term.formatted(),
            previous = previous,
            history = self.history.formatted(),
            recent = recent,
            task = task,
        );

        AssembledPrompt { full, task }
    }
}

fn format_chat_log(lines: &[ChatLine], placeholder: &str) -> String {
    if lines.is_empty() {
        return placeholder.to_owned();
    }
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::history::Role;
    use crate::memory::Importance;

    fn assembler(dir: &std::path::Path) -> ContextAssembler {
        let config = LlmConfig {
            persona_prompt: "You are Iris, a witty AI streamer.".to_owned(),
            user_prompt_template: "A viewer named '{nickname}' chatted: '{user_input}'".to_owned(),
            idle_prompt: "say something in chat or do something.".to_owned(),
            ..LlmConfig::default()
        };
        ContextAssembler::new(
            &config,
            Arc::new(LongTermMemory::open(dir.join("ltm.json"))),
            Arc::new(CoreMemoryStore::open(dir.join("core.json"))),
            Arc::new(ConversationHistory::new(50)),
        )
    }

    #[test]
    fn task_prompt_fills_template_for_speech_and_chat() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = assembler(dir.path());

        let event = InputEvent::chat("Alice", "hello!");
        assert!(ctx.task_prompt(&event) == "A viewer named 'Alice' chatted: 'hello!'");

        let event = InputEvent::idle();
        assert!(ctx.task_prompt(&event) == "say something in chat or do something.");
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = assembler(dir.path());

        let prompt = ctx.assemble(&InputEvent::speech("U", "hi"), &[], &[]);
        let order = [
            "# System Persona",
            "# Current Date and Time",
            "# Long-Term Memory",
            "# Previous Live Chat Log",
            "# Conversation History",
            "# Recent Live Chat Log",
            "# Current Task",
        ];
        let mut at = 0;
        for header in order {
            let pos = prompt.full[at..].find(header).unwrap();
            at += pos + header.len();
        }
    }

    #[test]
    fn empty_sections_use_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = assembler(dir.path());

        let prompt = ctx.assemble(&InputEvent::idle(), &[], &[]);
        assert!(prompt.full.contains("(No previous chats)"));
        assert!(prompt.full.contains("(No recent chats)"));
        assert!(prompt.full.contains("(No conversation history yet)"));
        assert!(prompt.full.contains("No long-term memories yet."));
        // Core memory section is omitted entirely when empty.
        assert!(!prompt.full.contains("# Core Memory"));
    }

    #[test]
    fn populated_sections_render_content() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = assembler(dir.path());
        ctx.long_term.insert("user likes pizza");
        ctx.core.insert("user name is Kim", Importance::High, "personal_info");
        ctx.history.push(Role::User, "hello");
        ctx.history.push(Role::Model, "hey there");

        let previous = vec![ChatLine::new("Alice", "old line")];
        let recent = vec![ChatLine::new("Bob", "new line")];
        let prompt = ctx.assemble(&InputEvent::chat("Bob", "new line"), &previous, &recent);

        assert!(prompt.full.contains("- user likes pizza"));
        assert!(prompt.full.contains("# Core Memory (Most Important Information)"));
        assert!(prompt.full.contains("user name is Kim"));
        assert!(prompt.full.contains("[Alice] old line"));
        assert!(prompt.full.contains("[Bob] new line"));
        assert!(prompt.full.contains("user: hello"));
        assert!(prompt.full.contains("model: hey there"));
        assert!(prompt.task == "A viewer named 'Bob' chatted: 'new line'");
    }

    #[test]
    fn datetime_section_includes_weekday() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = assembler(dir.path());
        let prompt = ctx.assemble(&InputEvent::idle(), &[], &[]);

        let weekday_present = [
            "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
        ]
        .iter()
        .any(|d| prompt.full.contains(d));
        assert!(weekday_present);
    }
}
