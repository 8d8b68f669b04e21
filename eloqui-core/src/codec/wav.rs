//! WAV encode/decode.
//!
//! Encoding is hand-rolled: a canonical 44-byte RIFF/WAVE header followed by
//! 16-bit PCM, so the output is byte-stable across platforms and an empty
//! buffer still yields a valid header-only file. Decoding goes through
//! `hound`, which copes with the padding and extension chunks real files
//! carry.

use std::io::Cursor;

use crate::codec::{AudioArtifact, SampleBuffer};
use crate::error::{EloquiError, Result};

/// Bytes in the canonical header: RIFF(12) + fmt(24) + data preamble(8).
pub const WAV_HEADER_LEN: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;

/// Quantize one f32 sample to signed 16-bit PCM.
///
/// Asymmetric scaling (negative × 32768, positive × 32767) uses the full
/// signed range; input is clamped to [-1, 1] first. Inverse of
/// [`dequantize`] — quantization is idempotent once applied.
#[inline]
fn quantize(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    let scaled = if clamped < 0.0 {
        clamped * 32768.0
    } else {
        clamped * 32767.0
    };
    scaled.round().clamp(-32768.0, 32767.0) as i16
}

#[inline]
fn dequantize(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}

/// Encode a sample buffer as an uncompressed 16-bit WAV artifact.
///
/// Channel data is written channel-major (all of channel 0, then channel 1,
/// …), matching the header's channel count. An empty buffer produces a
/// header-only artifact with zero data length — not an error.
pub fn encode_wav(buffer: &SampleBuffer) -> AudioArtifact {
    let channels = buffer.channel_count();
    let sample_rate = buffer.sample_rate();
    let data_len = buffer.frames() * channels as usize * 2;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len);

    // RIFF chunk descriptor
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt sub-chunk: PCM, 16-bit
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    // data sub-chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());

    for channel in 0..channels as usize {
        for &sample in buffer.channel(channel) {
            out.extend_from_slice(&quantize(sample).to_le_bytes());
        }
    }

    AudioArtifact::wav(out)
}

/// Decode WAV bytes into a sample buffer.
///
/// Accepts 16-bit integer and 32-bit float PCM. The flat sample stream is
/// split into channels in the same channel-major order [`encode_wav`]
/// writes, so `decode_wav(encode_wav(b))` reproduces `b`'s quantized
/// payload exactly.
pub fn decode_wav(bytes: &[u8]) -> Result<SampleBuffer> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| EloquiError::Decode(format!("wav header: {e}")))?;
    let spec = reader.spec();
    let channel_count = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            if spec.bits_per_sample != 16 {
                return Err(EloquiError::Decode(format!(
                    "unsupported bit depth: {}",
                    spec.bits_per_sample
                )));
            }
            reader
                .into_samples::<i16>()
                .map(|s| s.map(dequantize))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| EloquiError::Decode(format!("wav data: {e}")))?
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| EloquiError::Decode(format!("wav data: {e}")))?,
    };

    let frames = samples.len() / channel_count;
    let mut channels = Vec::with_capacity(channel_count);
    for c in 0..channel_count {
        channels.push(samples[c * frames..(c + 1) * frames].to_vec());
    }

    SampleBuffer::new(channels, spec.sample_rate)
}

/// Last-ditch PCM salvage for artifacts whose header no longer parses.
///
/// Scans for a `data` chunk marker and reads whatever 16-bit PCM follows,
/// taking channel count and rate from the `fmt ` chunk when one survives
/// (mono 44.1 kHz otherwise). Returns `None` when no plausible payload is
/// found.
pub fn salvage_pcm(bytes: &[u8]) -> Option<SampleBuffer> {
    let data_at = find_marker(bytes, b"data")?;
    let payload_at = data_at + 8;
    if payload_at >= bytes.len() {
        return None;
    }
    let declared = u32::from_le_bytes(bytes[data_at + 4..payload_at].try_into().ok()?) as usize;
    let available = bytes.len() - payload_at;
    let take = declared.min(available) & !1;
    if take < 2 {
        return None;
    }

    let (channels, sample_rate) = find_marker(bytes, b"fmt ")
        .and_then(|fmt_at| {
            let body = bytes.get(fmt_at + 8..fmt_at + 16)?;
            let channels = u16::from_le_bytes(body[2..4].try_into().ok()?);
            let rate = u32::from_le_bytes(body[4..8].try_into().ok()?);
            (channels >= 1 && (8_000..=192_000).contains(&rate))
                .then_some((channels as usize, rate))
        })
        .unwrap_or((1, 44_100));

    let samples: Vec<f32> = bytes[payload_at..payload_at + take]
        .chunks_exact(2)
        .map(|pair| dequantize(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    let frames = samples.len() / channels;
    if frames == 0 {
        return None;
    }
    let mut planar = Vec::with_capacity(channels);
    for c in 0..channels {
        planar.push(samples[c * frames..(c + 1) * frames].to_vec());
    }
    SampleBuffer::new(planar, sample_rate).ok()
}

fn find_marker(bytes: &[u8], marker: &[u8; 4]) -> Option<usize> {
    bytes.windows(4).position(|w| w == marker)
}
