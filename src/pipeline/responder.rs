//! The response pipeline: accepted event → prompt → LLM → TTS → sink.
//!
//! Two cooperating stages, each on its own task:
//! - the **response stage** turns accepted events into reply text;
//! - the **speaker stage** synthesizes reply text and streams it to the
//!   audio sink.
//!
//! They hand off through a single-slot intake so at most one synthesis is
//! pending. Both stages check the response gate at every boundary and drop
//! work whose token has been superseded; nothing is forcibly aborted.

use crate::arbiter::{AcceptedEvent, InterruptionSlot};
use crate::audio::{parse_leading_wav, pcm_to_samples};
use crate::chat::ChatWindow;
use crate::context::ContextAssembler;
use crate::events::{InteractionClock, ResponseToken, SpeakingState};
use crate::history::{ConversationHistory, Role};
use crate::pipeline::ResponseGate;
use crate::services::{AudioSink, LanguageModel, SpeechSynthesizer};
use crate::snapshot::{Dashboard, preview};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Spoken when generation fails or times out, so the audience still hears
/// that their input was received.
pub const APOLOGY_TEXT: &str = "Sorry, I can't come up with a reply right now.";

/// A reply waiting for synthesis.
#[derive(Debug, Clone)]
pub struct SpeechTask {
    /// Token of the response this text belongs to.
    pub token: ResponseToken,
    /// Reply text to synthesize.
    pub text: String,
}

/// Shared state handed to the response stage.
pub struct ResponderControl {
    /// Current-response gate.
    pub gate: Arc<ResponseGate>,
    /// Pending interruption record, consumed by the next run only.
    pub interruption: InterruptionSlot,
    /// Rolling chat window (split at assembly time).
    pub window: Arc<ChatWindow>,
    /// Conversation history.
    pub history: Arc<ConversationHistory>,
    /// Prompt assembler.
    pub assembler: Arc<ContextAssembler>,
    /// Language model adapter.
    pub llm: Arc<dyn LanguageModel>,
    /// Dashboard state view.
    pub dashboard: Arc<Dashboard>,
    /// Per-request generation timeout.
    pub llm_timeout: Duration,
    /// Shutdown signal.
    pub cancel: CancellationToken,
}

/// Run the response stage until cancelled.
pub async fn run_response_stage(
    ctl: ResponderControl,
    mut accepted_rx: mpsc::Receiver<AcceptedEvent>,
    tts_tx: mpsc::Sender<SpeechTask>,
) {
    info!("response stage started");
    loop {
        let accepted = tokio::select! {
            () = ctl.cancel.cancelled() => break,
            accepted = accepted_rx.recv() => match accepted {
                Some(accepted) => accepted,
                None => break,
            },
        };
        let AcceptedEvent { token, event } = accepted;

        // The event may have been superseded while it sat in the intake.
        if !ctl.gate.is_current(&token) {
            info!("skipping superseded event for response {token}");
            continue;
        }

        ctl.gate.set_state(SpeakingState::Synthesizing);
        ctl.dashboard
            .set_status(format!("Generating response to: {}", preview(&event.text, 30)));

        // A preemption note is consumed by exactly one run: this one.
        if let Some(record) = ctl.interruption.lock().ok().and_then(|mut slot| slot.take()) {
            ctl.history.push(
                Role::System,
                format!(
                    "previous response interrupted by {} with '{}'",
                    record.by_speaker, record.by_text
                ),
            );
        }

        // Split the window and advance the seen watermark atomically.
        let (previous_chats, recent_chats) = ctl.window.split_and_advance();
        let prompt = ctl.assembler.assemble(&event, &previous_chats, &recent_chats);
        ctl.dashboard.set_last_prompt(prompt.full.clone());

        let response = match timeout(ctl.llm_timeout, ctl.llm.generate(&prompt.full)).await {
            Ok(Ok(text)) => {
                ctl.history.push(Role::User, prompt.task.clone());
                ctl.history.push(Role::Model, text.clone());
                text
            }
            Ok(Err(e)) => {
                warn!("LLM generation failed: {e}; speaking apology");
                APOLOGY_TEXT.to_owned()
            }
            Err(_) => {
                warn!(
                    "LLM generation timed out after {}s; speaking apology",
                    ctl.llm_timeout.as_secs()
                );
                APOLOGY_TEXT.to_owned()
            }
        };

        // The generation is not cancellable mid-call; a preemption that
        // landed while it ran shows up here as a token mismatch.
        if !ctl.gate.is_current(&token) {
            info!("discarding generated response for superseded token {token}");
            continue;
        }

        if tts_tx.send(SpeechTask { token, text: response }).await.is_err() {
            break;
        }
    }
    info!("response stage stopped");
}

/// Shared state handed to the speaker stage.
pub struct SpeakerControl {
    /// Current-response gate.
    pub gate: Arc<ResponseGate>,
    /// Audio sink adapter.
    pub sink: Arc<dyn AudioSink>,
    /// Speech synthesizer adapter.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Last-interaction clock (touched when playback ends).
    pub clock: Arc<InteractionClock>,
    /// Dashboard state view.
    pub dashboard: Arc<Dashboard>,
    /// Timeout for opening a synthesis stream.
    pub tts_open_timeout: Duration,
    /// Shutdown signal.
    pub cancel: CancellationToken,
}

/// Run the speaker stage until cancelled.
pub async fn run_speaker_stage(ctl: SpeakerControl, mut tts_rx: mpsc::Receiver<SpeechTask>) {
    info!("speaker stage started");
    loop {
        let task = tokio::select! {
            () = ctl.cancel.cancelled() => break,
            task = tts_rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        // Purge stale intake items: only the current token may speak.
        if !ctl.gate.is_current(&task.token) {
            info!("skipping stale synthesis task for {}", task.token);
            continue;
        }

        ctl.dashboard
            .set_status(format!("Speaking: '{}'", preview(&task.text, 40)));
        ctl.clock.touch();

        speak_task(&ctl, &task).await;

        if ctl.gate.finish(&task.token) {
            info!("response {} playback complete", task.token);
            ctl.dashboard.set_status("Finished speaking. Waiting for input.");
            ctl.clock.touch();
        }
    }
    info!("speaker stage stopped");
}

/// Synthesize and play one task. Cleanup (clearing the token, publishing
/// idle) is the caller's job so every exit path ends in the same place.
async fn speak_task(ctl: &SpeakerControl, task: &SpeechTask) {
    let mut chunks =
        match timeout(ctl.tts_open_timeout, ctl.synthesizer.synthesize(&task.text)).await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                warn!("TTS request failed for {}: {e}", task.token);
                return;
            }
            Err(_) => {
                warn!(
                    "TTS open timed out after {}s for {}",
                    ctl.tts_open_timeout.as_secs(),
                    task.token
                );
                return;
            }
        };

    // First chunk carries the WAV header that describes the stream.
    let Some(first) = chunks.recv().await else {
        warn!("synthesizer produced no audio for {}", task.token);
        return;
    };
    let (format, first_samples) = match parse_leading_wav(&first) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("bad leading audio chunk for {}: {e}", task.token);
            return;
        }
    };

    if let Err(e) = ctl.sink.open(format).await {
        warn!("failed to open audio sink: {e}");
        return;
    }

    if !first_samples.is_empty()
        && let Err(e) = ctl.sink.write(&first_samples).await
    {
        warn!("sink write failed: {e}");
        ctl.sink.stop();
        return;
    }
    ctl.gate.set_state(SpeakingState::Playing);

    loop {
        let chunk = tokio::select! {
            () = ctl.cancel.cancelled() => {
                ctl.sink.stop();
                return;
            }
            chunk = chunks.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        // Barge-in lands here: a superseded token stops forwarding at the
        // next chunk boundary.
        if !ctl.gate.is_current(&task.token) {
            info!("playback of {} preempted; stopping sink", task.token);
            ctl.sink.stop();
            return;
        }

        let samples = pcm_to_samples(&chunk);
        if samples.is_empty() {
            continue;
        }
        if let Err(e) = ctl.sink.write(&samples).await {
            warn!("sink write failed: {e}");
            ctl.sink.stop();
            return;
        }
    }

    if let Err(e) = ctl.sink.close().await {
        warn!("sink close failed: {e}");
    }
}
