//! Input arbiter and barge-in controller.
//!
//! One loop owns the decision mailbox and the current-response identity.
//! Producers (speech callback, chat gate, idle timer) post [`InputEvent`]s;
//! the arbiter decides, per event at dequeue time, whether to accept it
//! with a fresh token, drop it, or preempt the response in flight. When
//! the pipeline is idle and several events queued up, a single drain picks
//! the newest user utterance.

use crate::events::{
    InputEvent, InputSource, InteractionClock, InterruptionRecord, ResponseToken, TokenIssuer,
};
use crate::pipeline::ResponseGate;
use crate::services::AudioSink;
use crate::snapshot::{Dashboard, preview};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Decision mailbox capacity.
const MAILBOX_CAPACITY: usize = 64;

/// Pending interruption record, written by the arbiter and consumed once
/// by the next pipeline run.
pub type InterruptionSlot = Arc<Mutex<Option<InterruptionRecord>>>;

/// An event the arbiter accepted, bound to its fresh response token.
#[derive(Debug, Clone)]
pub struct AcceptedEvent {
    /// The token issued at acceptance.
    pub token: ResponseToken,
    /// The accepted event (with `is_interruption` finalized).
    pub event: InputEvent,
}

/// Producer handle for the decision mailbox.
///
/// Posting never blocks; when the mailbox is full the event is dropped and
/// logged. The backlog counter lets producers and the idle timer observe
/// whether anything is waiting.
#[derive(Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<InputEvent>,
    depth: Arc<AtomicUsize>,
}

impl Mailbox {
    /// Post an event. Returns whether it was enqueued.
    pub fn post(&self, event: InputEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::AcqRel);
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("mailbox full; dropping {:?} event", event.source);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Number of events currently waiting in the mailbox.
    pub fn backlog(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

/// Consumer half of the mailbox, owned by the arbiter loop.
pub struct MailboxReceiver {
    rx: mpsc::Receiver<InputEvent>,
    depth: Arc<AtomicUsize>,
}

impl MailboxReceiver {
    async fn recv(&mut self) -> Option<InputEvent> {
        let event = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(event)
    }

    fn try_recv(&mut self) -> Option<InputEvent> {
        let event = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(event)
    }
}

/// Create a connected mailbox pair.
pub fn mailbox() -> (Mailbox, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let depth = Arc::new(AtomicUsize::new(0));
    (
        Mailbox {
            tx,
            depth: Arc::clone(&depth),
        },
        MailboxReceiver { rx, depth },
    )
}

/// Shared state handed to the arbiter loop.
pub struct ArbiterControl {
    /// Current-response gate (the arbiter is the only acceptor).
    pub gate: Arc<ResponseGate>,
    /// Slot for the pending interruption record.
    pub interruption: InterruptionSlot,
    /// Audio sink, stopped on preemption.
    pub sink: Arc<dyn AudioSink>,
    /// Last-interaction clock, touched at non-idle acceptance.
    pub clock: Arc<InteractionClock>,
    /// Dashboard state view.
    pub dashboard: Arc<Dashboard>,
    /// Shutdown signal.
    pub cancel: CancellationToken,
}

/// Run the arbiter loop until cancelled.
pub async fn run_arbiter(
    ctl: ArbiterControl,
    mut mailbox_rx: MailboxReceiver,
    accepted_tx: mpsc::Sender<AcceptedEvent>,
) {
    info!("input arbiter started");
    let issuer = TokenIssuer::new();
    loop {
        let event = tokio::select! {
            () = ctl.cancel.cancelled() => break,
            event = mailbox_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        guard_sink_invariant(&ctl);

        if ctl.gate.is_active() {
            decide_active(&ctl, &issuer, &accepted_tx, event).await;
            continue;
        }

        // Pipeline idle: drain whatever else is queued and coalesce so the
        // newest user utterance wins.
        let mut batch = vec![event];
        while let Some(more) = mailbox_rx.try_recv() {
            batch.push(more);
        }

        if batch.len() == 1 {
            let event = batch.remove(0);
            decide_idle(&ctl, &issuer, &accepted_tx, event, mailbox_rx.depth.load(Ordering::Acquire)).await;
        } else {
            let total = batch.len();
            let chosen = coalesce(batch);
            info!(
                "coalesced {} queued events; keeping {:?} from '{}'",
                total, chosen.source, chosen.speaker
            );
            accept(&ctl, &issuer, &accepted_tx, chosen).await;
        }
    }
    info!("input arbiter stopped");
}

/// Pipeline active: speech preempts, chat and idle are dropped.
async fn decide_active(
    ctl: &ArbiterControl,
    issuer: &TokenIssuer,
    accepted_tx: &mpsc::Sender<AcceptedEvent>,
    mut event: InputEvent,
) {
    match event.source {
        InputSource::Speech => {
            preempt_current(ctl, &event);
            event.is_interruption = true;
            accept(ctl, issuer, accepted_tx, event).await;
        }
        InputSource::Chat => {
            // The line already entered the rolling window at the producer.
            debug!(
                "dropping chat event from '{}' while a response is active",
                event.speaker
            );
        }
        InputSource::Idle => {
            debug!("dropping idle event while a response is active");
        }
    }
}

/// Pipeline idle, single pending event.
async fn decide_idle(
    ctl: &ArbiterControl,
    issuer: &TokenIssuer,
    accepted_tx: &mpsc::Sender<AcceptedEvent>,
    event: InputEvent,
    backlog: usize,
) {
    match event.source {
        InputSource::Speech | InputSource::Chat => {
            accept(ctl, issuer, accepted_tx, event).await;
        }
        InputSource::Idle => {
            if backlog == 0 {
                accept(ctl, issuer, accepted_tx, event).await;
            } else {
                debug!("dropping idle event; mailbox backlog is non-empty");
            }
        }
    }
}

/// Cancel the in-flight response for a preempting speech event.
fn preempt_current(ctl: &ArbiterControl, event: &InputEvent) {
    info!(
        "barge-in: '{}' spoke while a response was active: {}",
        event.speaker,
        preview(&event.text, 30)
    );

    // Clear the token first so every downstream boundary sees the mismatch,
    // then stop audio and record the interruption.
    let cancelled = ctl.gate.cancel_current();
    ctl.sink.stop();

    if let Some(interrupted) = cancelled {
        info!("cancelled response {interrupted}");
        if let Ok(mut slot) = ctl.interruption.lock() {
            *slot = Some(InterruptionRecord {
                interrupted,
                by_speaker: event.speaker.clone(),
                by_text: event.text.clone(),
                at: Instant::now(),
            });
        }
        ctl.dashboard.set_status(format!(
            "Interrupted by {}: {}",
            event.speaker,
            preview(&event.text, 30)
        ));
    }
}

/// Issue a fresh token and hand the event to the pipeline.
async fn accept(
    ctl: &ArbiterControl,
    issuer: &TokenIssuer,
    accepted_tx: &mpsc::Sender<AcceptedEvent>,
    event: InputEvent,
) {
    let token = issuer.issue();
    ctl.gate.begin(&token);
    if event.source != InputSource::Idle {
        ctl.clock.touch();
    }
    info!(
        "accepted {:?} event from '{}' as response {token}",
        event.source, event.speaker
    );
    if accepted_tx.send(AcceptedEvent { token, event }).await.is_err() {
        warn!("pipeline intake closed; dropping accepted event");
    }
}

/// Pick the winner of a mailbox drain: the newest interruption or speech
/// event, else the newest chat event, else the newest idle event.
///
/// Mailbox position breaks timestamp ties, so two events posted within the
/// same clock tick still resolve to the later arrival.
fn coalesce(batch: Vec<InputEvent>) -> InputEvent {
    let mut ordered: Vec<(usize, InputEvent)> = batch.into_iter().enumerate().collect();
    ordered.sort_by(|a, b| {
        b.1.received_at
            .cmp(&a.1.received_at)
            .then(b.0.cmp(&a.0))
    });
    let pick = ordered
        .iter()
        .position(|(_, e)| e.is_interruption || e.source == InputSource::Speech)
        .or_else(|| {
            ordered
                .iter()
                .position(|(_, e)| e.source == InputSource::Chat)
        })
        .unwrap_or(0);
    ordered.swap_remove(pick).1
}

/// A sink that claims to be playing with no bound token means some stage
/// died without cleanup. Force the system back to a sane idle state.
fn guard_sink_invariant(ctl: &ArbiterControl) {
    if ctl.sink.is_playing() && !ctl.gate.is_active() {
        error!("sink reports playing with no current response token; forcing stop");
        ctl.sink.stop();
        ctl.gate.set_state(crate::events::SpeakingState::Idle);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use tokio::time::{Duration, advance};

    async fn spaced(events: Vec<InputEvent>) -> Vec<InputEvent> {
        // Rebuild with distinct timestamps under the paused clock.
        let mut out = Vec::new();
        for mut event in events {
            advance(Duration::from_millis(100)).await;
            event.received_at = Instant::now();
            out.push(event);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn newest_speech_wins_coalescing() {
        let batch = spaced(vec![
            InputEvent::chat("A", "chat line"),
            InputEvent::speech("U", "a"),
            InputEvent::speech("U", "b"),
            InputEvent::speech("U", "c"),
            InputEvent::idle(),
        ])
        .await;

        let chosen = coalesce(batch);
        assert!(chosen.source == InputSource::Speech);
        assert!(chosen.text == "c");
    }

    #[tokio::test(start_paused = true)]
    async fn chat_wins_when_no_speech_pending() {
        let batch = spaced(vec![
            InputEvent::idle(),
            InputEvent::chat("A", "first"),
            InputEvent::chat("B", "second"),
        ])
        .await;

        let chosen = coalesce(batch);
        assert!(chosen.source == InputSource::Chat);
        assert!(chosen.text == "second");
    }

    #[tokio::test(start_paused = true)]
    async fn same_instant_events_resolve_by_arrival_order() {
        // Both posted within one clock tick: identical timestamps.
        let batch = vec![
            InputEvent::speech("U", "first"),
            InputEvent::speech("U", "second"),
        ];
        let chosen = coalesce(batch);
        assert!(chosen.text == "second");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_only_batch_keeps_newest_idle() {
        let batch = spaced(vec![InputEvent::idle(), InputEvent::idle()]).await;
        let chosen = coalesce(batch);
        assert!(chosen.source == InputSource::Idle);
    }

    #[tokio::test]
    async fn mailbox_tracks_backlog() {
        let (mailbox, mut rx) = mailbox();
        assert!(mailbox.backlog() == 0);

        assert!(mailbox.post(InputEvent::idle()));
        assert!(mailbox.post(InputEvent::chat("A", "x")));
        assert!(mailbox.backlog() == 2);

        let first = rx.recv().await.unwrap();
        assert!(first.source == InputSource::Idle);
        assert!(mailbox.backlog() == 1);

        assert!(rx.try_recv().is_some());
        assert!(mailbox.backlog() == 0);
        assert!(rx.try_recv().is_none());
    }
}
