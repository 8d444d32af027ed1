//! Audio output: WAV chunk decoding and the cpal playback sink.

mod sink;
mod wav;

pub use sink::CpalSink;
pub use wav::{chunk_loudness, parse_leading_wav, pcm_to_samples};

/// Playback stream parameters carried by the first synthesized chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Bits per sample (16-bit PCM is the supported format).
    pub bits_per_sample: u16,
}
