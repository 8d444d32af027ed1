//! Audio playback sink backed by cpal.
//!
//! The cpal `Stream` is not `Send`, so each playback stream lives on a
//! dedicated thread that owns it for its whole life. The async side talks
//! to that thread through a shared sample buffer and a handful of atomics:
//! `write` pushes decoded samples and the stream callback drains them.

use crate::audio::AudioFormat;
use crate::error::{Result, StreamError};
use crate::services::{AudioSink, LoudnessCallback};
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info};

/// Cadence of the playback thread's exit checks.
const WORKER_POLL: Duration = Duration::from_millis(10);

/// Backpressure poll cadence for `write`.
const WRITE_POLL: Duration = Duration::from_millis(5);

/// Extra time the playback thread lingers after the buffer drains so the
/// device can finish the last hardware buffer.
const DRAIN_TAIL: Duration = Duration::from_millis(100);

/// Audio sink playing synthesized speech through a cpal output device.
pub struct CpalSink {
    shared: Arc<SinkShared>,
}

struct SinkShared {
    /// True from a successful `open` until the stream thread exits.
    playing: AtomicBool,
    /// Preemptive-stop latch for the current stream.
    stopped: AtomicBool,
    /// Set by `close` once no further writes will arrive.
    closing: AtomicBool,
    /// True while a playback thread owns a stream.
    worker_active: AtomicBool,
    /// Interleaved f32 samples waiting for the device callback.
    buffer: Mutex<VecDeque<f32>>,
    /// Format of the currently open stream.
    format: Mutex<Option<AudioFormat>>,
    /// Registered per-chunk loudness callback.
    loudness: Mutex<Option<LoudnessCallback>>,
    /// Preferred output device name (None = system default).
    output_device: Mutex<Option<String>>,
}

impl CpalSink {
    /// Create a sink targeting the given output device (None = default).
    pub fn new(output_device: Option<String>) -> Self {
        Self {
            shared: Arc::new(SinkShared {
                playing: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                worker_active: AtomicBool::new(false),
                buffer: Mutex::new(VecDeque::new()),
                format: Mutex::new(None),
                loudness: Mutex::new(None),
                output_device: Mutex::new(output_device),
            }),
        }
    }

    fn emit_loudness(&self, value: f32) {
        if let Ok(guard) = self.shared.loudness.lock()
            && let Some(cb) = guard.as_ref()
        {
            cb(value);
        }
    }

    fn pick_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        let wanted = self
            .shared
            .output_device
            .lock()
            .map(|g| g.clone())
            .unwrap_or(None);

        let device = if let Some(ref name) = wanted {
            host.output_devices()
                .map_err(|e| StreamError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| StreamError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| StreamError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");
        Ok(device)
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn open(&self, format: AudioFormat) -> Result<()> {
        // Wait out any previous stream thread that is still winding down.
        while self.shared.worker_active.load(Ordering::Acquire) {
            self.shared.stopped.store(true, Ordering::Release);
            tokio::time::sleep(WORKER_POLL).await;
        }

        self.shared.stopped.store(false, Ordering::Release);
        self.shared.closing.store(false, Ordering::Release);
        if let Ok(mut buffer) = self.shared.buffer.lock() {
            buffer.clear();
        }
        if let Ok(mut fmt) = self.shared.format.lock() {
            *fmt = Some(format);
        }

        let device = self.pick_device()?;
        let stream_config = StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::clone(&self.shared);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        shared.worker_active.store(true, Ordering::Release);
        std::thread::spawn(move || {
            run_stream_thread(shared, device, stream_config, ready_tx);
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.shared.playing.store(true, Ordering::Release);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(StreamError::Audio("playback thread died during open".into())),
        }
    }

    async fn write(&self, samples: &[i16]) -> Result<()> {
        if self.shared.stopped.load(Ordering::Acquire)
            || !self.shared.playing.load(Ordering::Acquire)
        {
            return Ok(());
        }

        self.emit_loudness(super::chunk_loudness(samples));

        let high_water = {
            let fmt = self
                .shared
                .format
                .lock()
                .map(|g| *g)
                .unwrap_or(None)
                .unwrap_or(AudioFormat {
                    sample_rate: 24_000,
                    channels: 1,
                    bits_per_sample: 16,
                });
            // Roughly one second of buffered audio.
            fmt.sample_rate as usize * fmt.channels as usize
        };

        if let Ok(mut buffer) = self.shared.buffer.lock() {
            buffer.extend(samples.iter().map(|&s| f32::from(s) / 32_768.0));
        }

        // Backpressure: approximate real-time pacing by letting the device
        // callback drain the buffer before accepting more.
        loop {
            if self.shared.stopped.load(Ordering::Acquire) {
                break;
            }
            let buffered = self.shared.buffer.lock().map(|b| b.len()).unwrap_or(0);
            if buffered <= high_water {
                break;
            }
            tokio::time::sleep(WRITE_POLL).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shared.closing.store(true, Ordering::Release);
        while self.shared.worker_active.load(Ordering::Acquire) {
            tokio::time::sleep(WORKER_POLL).await;
        }
        Ok(())
    }

    fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Ok(mut buffer) = self.shared.buffer.lock() {
            buffer.clear();
        }
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    fn set_output_device(&self, device: Option<String>) -> Result<()> {
        info!("output device changed to {:?}", device.as_deref().unwrap_or("<default>"));
        if let Ok(mut guard) = self.shared.output_device.lock() {
            *guard = device;
        }
        // Takes effect on the next `open`; an in-flight stream keeps its
        // device until it ends.
        Ok(())
    }

    fn on_chunk_loudness(&self, callback: LoudnessCallback) {
        if let Ok(mut guard) = self.shared.loudness.lock() {
            *guard = Some(callback);
        }
    }
}

/// Owns the cpal stream for one playback session.
fn run_stream_thread(
    shared: Arc<SinkShared>,
    device: cpal::Device,
    stream_config: StreamConfig,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let callback_shared = Arc::clone(&shared);
    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
            let mut buffer = match callback_shared.buffer.lock() {
                Ok(b) => b,
                Err(_) => return,
            };
            for sample in data.iter_mut() {
                *sample = buffer.pop_front().unwrap_or(0.0);
            }
        },
        move |err| {
            error!("audio output stream error: {err}");
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(StreamError::Audio(format!(
                "failed to build output stream: {e}"
            ))));
            finish_stream_thread(&shared);
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(StreamError::Audio(format!(
            "failed to start output stream: {e}"
        ))));
        finish_stream_thread(&shared);
        return;
    }

    let _ = ready_tx.send(Ok(()));

    loop {
        if shared.stopped.load(Ordering::Acquire) {
            break;
        }
        let drained = shared.buffer.lock().map(|b| b.is_empty()).unwrap_or(true);
        if shared.closing.load(Ordering::Acquire) && drained {
            // Let the device play out its last hardware buffer.
            std::thread::sleep(DRAIN_TAIL);
            break;
        }
        std::thread::sleep(WORKER_POLL);
    }

    drop(stream);
    finish_stream_thread(&shared);
}

fn finish_stream_thread(shared: &Arc<SinkShared>) {
    shared.playing.store(false, Ordering::Release);
    if let Ok(mut buffer) = shared.buffer.lock() {
        buffer.clear();
    }
    // Close the avatar's mouth once playback ends.
    if let Ok(guard) = shared.loudness.lock()
        && let Some(cb) = guard.as_ref()
    {
        cb(0.0);
    }
    shared.worker_active.store(false, Ordering::Release);
}
