#![allow(clippy::unwrap_used, clippy::expect_used)]

//! The memory background workers driven directly with scripted models and
//! a paused clock: session summarization into long-term memory and
//! tool-call distillation into core memory.

use async_trait::async_trait;
use iris::chat::ChatWindow;
use iris::error::Result;
use iris::history::{ConversationHistory, Role};
use iris::memory::{CoreMemoryStore, LongTermMemory};
use iris::pipeline::ResponseGate;
use iris::services::{LanguageModel, ToolCall, ToolSchema};
use iris::snapshot::Dashboard;
use iris::workers::{
    DistillerControl, SAVE_CORE_MEMORY_TOOL, SummarizerControl, run_core_memory_distiller,
    run_session_summarizer,
};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

struct ScriptedModel {
    summary: String,
    summarize_inputs: Mutex<Vec<String>>,
    tool_calls: Mutex<Vec<ToolCall>>,
    tool_prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(summary: &str) -> Self {
        Self {
            summary: summary.to_owned(),
            summarize_inputs: Mutex::new(Vec::new()),
            tool_calls: Mutex::new(Vec::new()),
            tool_prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok("unused".to_owned())
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        self.summarize_inputs.lock().unwrap().push(text.to_owned());
        Ok(self.summary.clone())
    }

    async fn generate_with_tools(
        &self,
        prompt: &str,
        _tools: &[ToolSchema],
    ) -> Result<Vec<ToolCall>> {
        self.tool_prompts.lock().unwrap().push(prompt.to_owned());
        Ok(self.tool_calls.lock().unwrap().clone())
    }
}

fn dashboard() -> Arc<Dashboard> {
    Arc::new(Dashboard::new(
        Arc::new(ResponseGate::new()),
        Arc::new(ChatWindow::new(20)),
    ))
}

#[tokio::test(start_paused = true)]
async fn summarizer_appends_deduplicated_facts() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedModel::new("user name is Kim"));
    let history = Arc::new(ConversationHistory::new(50));
    let long_term = Arc::new(LongTermMemory::open(dir.path().join("ltm.json")));
    let cancel = CancellationToken::new();

    history.push(Role::User, "U: my name is Kim");
    history.push(Role::Model, "nice to meet you Kim!");

    let worker = tokio::spawn(run_session_summarizer(SummarizerControl {
        llm: llm.clone(),
        history: history.clone(),
        long_term: long_term.clone(),
        dashboard: dashboard(),
        interval: Duration::from_secs(300),
        request_timeout: Duration::from_secs(30),
        cancel: cancel.clone(),
    }));

    // Two full cycles with an unchanged history: the identical summary is
    // inserted once, the second insert is a no-op.
    sleep(Duration::from_secs(700)).await;
    assert_eq!(long_term.all(), vec!["user name is Kim"]);
    assert_eq!(llm.summarize_inputs.lock().unwrap().len(), 2);

    // The summarizer passes the formatted history to the model.
    assert!(llm.summarize_inputs.lock().unwrap()[0].contains("user: U: my name is Kim"));

    cancel.cancel();
    let _ = worker.await;
}

#[tokio::test(start_paused = true)]
async fn summarizer_skips_empty_history() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedModel::new("anything"));
    let long_term = Arc::new(LongTermMemory::open(dir.path().join("ltm.json")));
    let cancel = CancellationToken::new();

    let worker = tokio::spawn(run_session_summarizer(SummarizerControl {
        llm: llm.clone(),
        history: Arc::new(ConversationHistory::new(50)),
        long_term: long_term.clone(),
        dashboard: dashboard(),
        interval: Duration::from_secs(300),
        request_timeout: Duration::from_secs(30),
        cancel: cancel.clone(),
    }));

    sleep(Duration::from_secs(700)).await;
    assert!(long_term.is_empty());
    assert!(llm.summarize_inputs.lock().unwrap().is_empty());

    cancel.cancel();
    let _ = worker.await;
}

#[tokio::test(start_paused = true)]
async fn distiller_saves_tool_called_core_memories() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedModel::new("unused"));
    let long_term = Arc::new(LongTermMemory::open(dir.path().join("ltm.json")));
    let core = Arc::new(CoreMemoryStore::open(dir.path().join("core.json")));
    let cancel = CancellationToken::new();

    long_term.insert("user likes pizza");
    long_term.insert("user name is Kim");
    *llm.tool_calls.lock().unwrap() = vec![ToolCall {
        name: SAVE_CORE_MEMORY_TOOL.to_owned(),
        args: serde_json::json!({
            "memory_text": "user name is Kim",
            "importance_level": "high",
            "category": "personal_info"
        }),
    }];

    let worker = tokio::spawn(run_core_memory_distiller(DistillerControl {
        llm: llm.clone(),
        long_term: long_term.clone(),
        core: core.clone(),
        dashboard: dashboard(),
        interval: Duration::from_secs(1800),
        request_timeout: Duration::from_secs(30),
        cancel: cancel.clone(),
    }));

    sleep(Duration::from_secs(1900)).await;

    let entries = core.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].text == "user name is Kim");
    assert!(entries[0].category == "personal_info");

    // The distillation prompt carries the current facts.
    let prompts = llm.tool_prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("- user likes pizza"));
    assert!(prompts[0].contains("- user name is Kim"));

    cancel.cancel();
    let _ = worker.await;
}

#[tokio::test(start_paused = true)]
async fn distiller_skips_empty_long_term_memory() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedModel::new("unused"));
    let core = Arc::new(CoreMemoryStore::open(dir.path().join("core.json")));
    let cancel = CancellationToken::new();

    let worker = tokio::spawn(run_core_memory_distiller(DistillerControl {
        llm: llm.clone(),
        long_term: Arc::new(LongTermMemory::open(dir.path().join("ltm.json"))),
        core: core.clone(),
        dashboard: dashboard(),
        interval: Duration::from_secs(1800),
        request_timeout: Duration::from_secs(30),
        cancel: cancel.clone(),
    }));

    sleep(Duration::from_secs(1900)).await;
    assert!(core.is_empty());
    assert!(llm.tool_prompts.lock().unwrap().is_empty());

    cancel.cancel();
    let _ = worker.await;
}
