//! Decoding of synthesized audio chunks.
//!
//! The synthesizer's first chunk is a complete WAV file whose header
//! describes the stream; every later chunk is raw little-endian PCM in the
//! same format.

use crate::audio::AudioFormat;
use crate::error::{Result, StreamError};
use std::io::Cursor;

/// Gain applied to normalized RMS before clipping to `[0, 1]`.
///
/// Synthesized speech rarely approaches full scale, so raw RMS would barely
/// open the avatar's mouth.
const LOUDNESS_GAIN: f32 = 10.0;

/// Parse the leading WAV chunk of a synthesis stream.
///
/// Returns the stream format and the PCM samples contained in the chunk.
///
/// # Errors
///
/// Returns an error if the chunk is not a WAV file or uses an unsupported
/// sample width.
pub fn parse_leading_wav(chunk: &[u8]) -> Result<(AudioFormat, Vec<i16>)> {
    let reader = hound::WavReader::new(Cursor::new(chunk))
        .map_err(|e| StreamError::Audio(format!("malformed WAV header chunk: {e}")))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(StreamError::Audio(format!(
            "unsupported sample format: {} bits {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    // The chunk may end mid-frame when the synthesizer flushed early; keep
    // every complete sample and drop the trailing fragment.
    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .map_while(|s| s.ok())
        .collect();

    Ok((
        AudioFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
        },
        samples,
    ))
}

/// Decode a raw PCM chunk into 16-bit samples (little-endian).
pub fn pcm_to_samples(chunk: &[u8]) -> Vec<i16> {
    chunk
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Normalized loudness of a chunk: `10 · rms / i16::MAX`, clipped to `[0, 1]`.
pub fn chunk_loudness(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s);
            v * v
        })
        .sum();
    let rms = (sum_squares / samples.len() as f64).sqrt() as f32;
    (LOUDNESS_GAIN * rms / f32::from(i16::MAX)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn parses_header_and_samples_from_first_chunk() {
        let samples = [100i16, -100, 2000, -2000];
        let chunk = wav_bytes(24_000, 1, &samples);

        let (format, decoded) = parse_leading_wav(&chunk).unwrap();
        assert!(format.sample_rate == 24_000);
        assert!(format.channels == 1);
        assert!(format.bits_per_sample == 16);
        assert!(decoded == samples);
    }

    #[test]
    fn rejects_non_wav_chunk() {
        assert!(parse_leading_wav(b"raw pcm bytes, no header").is_err());
    }

    #[test]
    fn pcm_decoding_is_little_endian() {
        let bytes = [0x00, 0x01, 0xFF, 0x7F, 0x01];
        let samples = pcm_to_samples(&bytes);
        assert!(samples == vec![256, i16::MAX]);
    }

    #[test]
    fn loudness_is_normalized_and_clipped() {
        assert!(chunk_loudness(&[]) == 0.0);
        assert!(chunk_loudness(&[0, 0, 0, 0]) == 0.0);

        // Full-scale square wave: rms = i16::MAX, gain pushes past 1.0.
        let loud = vec![i16::MAX; 128];
        assert!(chunk_loudness(&loud) == 1.0);

        let quiet = vec![160i16; 128];
        let loudness = chunk_loudness(&quiet);
        assert!(loudness > 0.0 && loudness < 0.1);
    }
}
