//! Top-level orchestrator: wires the services, shared state, arbiter,
//! pipeline, and background workers together.

use crate::arbiter::{
    ArbiterControl, InterruptionSlot, Mailbox, mailbox, run_arbiter,
};
use crate::chat::ChatWindow;
use crate::config::StreamerConfig;
use crate::context::ContextAssembler;
use crate::error::{Result, StreamError};
use crate::events::{InputEvent, InteractionClock};
use crate::history::ConversationHistory;
use crate::memory::{CoreMemoryStore, LongTermMemory};
use crate::pipeline::{
    ResponderControl, ResponseGate, SpeakerControl, SpeechTask, run_response_stage,
    run_speaker_stage,
};
use crate::services::{
    AudioSink, AvatarController, ChatSource, LanguageModel, SpeechRecognizer, SpeechSynthesizer,
};
use crate::snapshot::{Dashboard, DashboardSnapshot};
use crate::workers::{
    ChatPollerControl, DistillerControl, IdleTimerControl, SummarizerControl, run_chat_poller,
    run_core_memory_distiller, run_idle_timer, run_session_summarizer,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Buffer for events the arbiter has accepted but the pipeline has not yet
/// picked up. Preemption bursts can briefly queue several.
const ACCEPTED_CHANNEL_SIZE: usize = 8;

/// Injected external collaborators.
///
/// The language model, synthesizer, and sink are always required; the
/// recognizer and chat source only when their config sections enable them.
pub struct Services {
    /// Language model adapter.
    pub llm: Arc<dyn LanguageModel>,
    /// Speech synthesizer adapter.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Audio sink adapter.
    pub sink: Arc<dyn AudioSink>,
    /// Speech recognizer (required when `stt.enabled`).
    pub recognizer: Option<Arc<dyn SpeechRecognizer>>,
    /// Chat source (required when `chat.enabled`).
    pub chat: Option<Arc<dyn ChatSource>>,
    /// Avatar controller driven by playback loudness.
    pub avatar: Option<Arc<dyn AvatarController>>,
}

/// The conversational core. Owns all shared state and the worker tasks.
pub struct Orchestrator {
    config: StreamerConfig,
    services: Services,
    gate: Arc<ResponseGate>,
    window: Arc<ChatWindow>,
    history: Arc<ConversationHistory>,
    long_term: Arc<LongTermMemory>,
    core_memory: Arc<CoreMemoryStore>,
    clock: Arc<InteractionClock>,
    interruption: InterruptionSlot,
    dashboard: Arc<Dashboard>,
    assembler: Arc<ContextAssembler>,
    /// Producer handle for the current mailbox; `None` while stopped.
    inputs: Arc<RwLock<Option<Mailbox>>>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    running: bool,
}

impl Orchestrator {
    /// Build the core around a config and the injected services.
    ///
    /// Opens both memory stores immediately; a missing or corrupt file is
    /// logged and the store starts fresh.
    pub fn new(config: StreamerConfig, services: Services) -> Self {
        let gate = Arc::new(ResponseGate::new());
        let window = Arc::new(ChatWindow::new(config.chat.max_recent_chats));
        let history = Arc::new(ConversationHistory::new(config.llm.max_history));
        let long_term = Arc::new(LongTermMemory::open(&config.llm.memory_path));
        let core_memory = Arc::new(CoreMemoryStore::open(&config.llm.core_memory_path));
        let dashboard = Arc::new(Dashboard::new(Arc::clone(&gate), Arc::clone(&window)));
        let assembler = Arc::new(ContextAssembler::new(
            &config.llm,
            Arc::clone(&long_term),
            Arc::clone(&core_memory),
            Arc::clone(&history),
        ));

        Self {
            config,
            services,
            gate,
            window,
            history,
            long_term,
            core_memory,
            clock: Arc::new(InteractionClock::new()),
            interruption: Arc::new(Mutex::new(None)),
            dashboard,
            assembler,
            inputs: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
            running: false,
        }
    }

    /// Start the arbiter, pipeline, and enabled background workers.
    ///
    /// # Errors
    ///
    /// Returns a config error when an enabled input has no backing service.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            warn!("orchestrator is already running");
            return Ok(());
        }

        if self.config.stt.enabled && self.services.recognizer.is_none() {
            return Err(StreamError::Config(
                "stt.enabled is set but no speech recognizer was provided".into(),
            ));
        }
        if self.config.chat.enabled && self.services.chat.is_none() {
            return Err(StreamError::Config(
                "chat.enabled is set but no chat source was provided".into(),
            ));
        }

        info!("starting orchestrator");
        self.cancel = CancellationToken::new();

        if self.config.audio.output_device.is_some() {
            self.services
                .sink
                .set_output_device(self.config.audio.output_device.clone())?;
        }

        // Playback loudness drives the avatar mouth.
        if let Some(avatar) = self.services.avatar.clone() {
            self.services.sink.on_chunk_loudness(Arc::new(move |value| {
                avatar.set_mouth_open(value.clamp(0.0, 1.0));
            }));
        }

        let (inputs, mailbox_rx) = mailbox();
        let (accepted_tx, accepted_rx) = mpsc::channel(ACCEPTED_CHANNEL_SIZE);
        // Single-slot TTS intake: at most one synthesis pending.
        let (tts_tx, tts_rx) = mpsc::channel::<SpeechTask>(1);

        if let Ok(mut guard) = self.inputs.write() {
            *guard = Some(inputs.clone());
        }

        self.handles.push(tokio::spawn(run_arbiter(
            ArbiterControl {
                gate: Arc::clone(&self.gate),
                interruption: Arc::clone(&self.interruption),
                sink: Arc::clone(&self.services.sink),
                clock: Arc::clone(&self.clock),
                dashboard: Arc::clone(&self.dashboard),
                cancel: self.cancel.clone(),
            },
            mailbox_rx,
            accepted_tx,
        )));

        self.handles.push(tokio::spawn(run_response_stage(
            ResponderControl {
                gate: Arc::clone(&self.gate),
                interruption: Arc::clone(&self.interruption),
                window: Arc::clone(&self.window),
                history: Arc::clone(&self.history),
                assembler: Arc::clone(&self.assembler),
                llm: Arc::clone(&self.services.llm),
                dashboard: Arc::clone(&self.dashboard),
                llm_timeout: Duration::from_secs(self.config.llm.request_timeout_s),
                cancel: self.cancel.clone(),
            },
            accepted_rx,
            tts_tx,
        )));

        self.handles.push(tokio::spawn(run_speaker_stage(
            SpeakerControl {
                gate: Arc::clone(&self.gate),
                sink: Arc::clone(&self.services.sink),
                synthesizer: Arc::clone(&self.services.synthesizer),
                clock: Arc::clone(&self.clock),
                dashboard: Arc::clone(&self.dashboard),
                tts_open_timeout: Duration::from_secs(self.config.tts.open_timeout_s),
                cancel: self.cancel.clone(),
            },
            tts_rx,
        )));

        if self.config.chat.enabled
            && let Some(chat) = self.services.chat.clone()
        {
            self.handles.push(tokio::spawn(run_chat_poller(ChatPollerControl {
                source: chat,
                window: Arc::clone(&self.window),
                mailbox: inputs.clone(),
                config: self.config.chat.clone(),
                cancel: self.cancel.clone(),
            })));
        }

        if self.config.idle.enabled {
            self.handles.push(tokio::spawn(run_idle_timer(IdleTimerControl {
                mailbox: inputs.clone(),
                gate: Arc::clone(&self.gate),
                sink: Arc::clone(&self.services.sink),
                clock: Arc::clone(&self.clock),
                config: self.config.idle.clone(),
                dashboard: Arc::clone(&self.dashboard),
                cancel: self.cancel.clone(),
            })));
        }

        if self.config.llm.enable_memory_summarization {
            self.handles
                .push(tokio::spawn(run_session_summarizer(SummarizerControl {
                    llm: Arc::clone(&self.services.llm),
                    history: Arc::clone(&self.history),
                    long_term: Arc::clone(&self.long_term),
                    dashboard: Arc::clone(&self.dashboard),
                    interval: Duration::from_secs(self.config.llm.memory_summarize_interval_s),
                    request_timeout: Duration::from_secs(self.config.llm.request_timeout_s),
                    cancel: self.cancel.clone(),
                })));
        }

        if self.config.llm.enable_core_memory_processing {
            self.handles
                .push(tokio::spawn(run_core_memory_distiller(DistillerControl {
                    llm: Arc::clone(&self.services.llm),
                    long_term: Arc::clone(&self.long_term),
                    core: Arc::clone(&self.core_memory),
                    dashboard: Arc::clone(&self.dashboard),
                    interval: Duration::from_secs(self.config.llm.core_memory_interval_s),
                    request_timeout: Duration::from_secs(self.config.llm.request_timeout_s),
                    cancel: self.cancel.clone(),
                })));
        }

        if self.config.stt.enabled
            && let Some(recognizer) = self.services.recognizer.clone()
        {
            let inputs = inputs.clone();
            let started = recognizer.start(Arc::new(move |speaker, text| {
                inputs.post(InputEvent::speech(speaker, text));
            }));
            if let Err(e) = started {
                // Unwind the tasks spawned above; a half-started core must
                // not keep running behind a failed start().
                self.cancel.cancel();
                if let Ok(mut guard) = self.inputs.write() {
                    *guard = None;
                }
                for handle in self.handles.drain(..) {
                    let _ = handle.await;
                }
                return Err(e);
            }
        }

        self.clock.touch();
        self.dashboard.set_status("Waiting for input.");
        self.running = true;
        info!("orchestrator started");
        Ok(())
    }

    /// Stop everything: cancels the workers, stops the recognizer and
    /// sink, and waits for the tasks to finish.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        info!("stopping orchestrator");
        self.dashboard.set_status("Shutting down...");
        self.cancel.cancel();

        if let Some(recognizer) = &self.services.recognizer {
            recognizer.stop();
        }
        self.services.sink.stop();

        if let Ok(mut guard) = self.inputs.write() {
            *guard = None;
        }
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        self.running = false;
        info!("orchestrator stopped");
    }

    /// Feed one transcribed utterance into the core.
    ///
    /// This is the same surface the recognizer callback uses; it is safe
    /// to call from any context at any time. Utterances arriving while
    /// stopped are ignored.
    pub fn on_transcribed(&self, speaker: &str, text: &str) {
        let posted = self
            .inputs
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|m| m.post(InputEvent::speech(speaker, text))))
            .unwrap_or(false);
        if !posted {
            warn!("dropping utterance from '{speaker}': orchestrator not running");
        }
    }

    /// Swap the recognizer's input devices. Safe at any time.
    ///
    /// # Errors
    ///
    /// Returns a config error when no recognizer was provided.
    pub fn change_input_devices(&self, devices: &HashMap<String, String>) -> Result<()> {
        match &self.services.recognizer {
            Some(recognizer) => recognizer.change_devices(devices),
            None => Err(StreamError::Config(
                "cannot change input devices: no speech recognizer was provided".into(),
            )),
        }
    }

    /// Route playback to a different output device (None = default).
    ///
    /// # Errors
    ///
    /// Returns an error when the sink rejects the device.
    pub fn change_output_device(&self, device: Option<String>) -> Result<()> {
        self.services.sink.set_output_device(device)
    }

    /// Dashboard read handle.
    pub fn dashboard(&self) -> Arc<Dashboard> {
        Arc::clone(&self.dashboard)
    }

    /// Convenience snapshot of the externally visible state.
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.dashboard.snapshot()
    }

    /// Shared conversation history.
    pub fn history(&self) -> Arc<ConversationHistory> {
        Arc::clone(&self.history)
    }

    /// Shared long-term memory store.
    pub fn long_term_memory(&self) -> Arc<LongTermMemory> {
        Arc::clone(&self.long_term)
    }

    /// Shared core memory store.
    pub fn core_memory(&self) -> Arc<CoreMemoryStore> {
        Arc::clone(&self.core_memory)
    }
}
