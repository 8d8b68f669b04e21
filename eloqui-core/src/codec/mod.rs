//! PCM sample buffers, encoded artifacts, and the WAV/tone/resample codecs.

pub mod mpeg;
pub mod resample;
pub mod tone;
pub mod wav;

use serde::{Deserialize, Serialize};

use crate::error::{EloquiError, Result};

/// Planar f32 PCM audio: one or more channels of equal length at a known
/// sample rate.
///
/// Amplitudes are nominally in [-1.0, 1.0]; anything outside that range is
/// clamped at encode time, not at construction.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Build a multi-channel buffer. All channels must have the same length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(EloquiError::InvalidBuffer("no channels".into()));
        }
        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(EloquiError::InvalidBuffer(
                "channel lengths differ".into(),
            ));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Build a mono buffer. Never fails.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            channels: vec![samples],
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Mean-downmix all channels into one. Returns `self` unchanged when
    /// already mono.
    pub fn downmix_mono(self) -> Self {
        if self.channels.len() == 1 {
            return self;
        }
        let frames = self.frames();
        let n = self.channels.len() as f32;
        let mut mixed = vec![0f32; frames];
        for channel in &self.channels {
            for (acc, sample) in mixed.iter_mut().zip(channel) {
                *acc += sample;
            }
        }
        for sample in &mut mixed {
            *sample /= n;
        }
        Self {
            channels: vec![mixed],
            sample_rate: self.sample_rate,
        }
    }
}

/// MIME tag of an encoded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioMime {
    /// Uncompressed WAV produced locally.
    Wav,
    /// Opaque compressed bytes from a remote endpoint.
    Mpeg,
}

impl AudioMime {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioMime::Wav => "audio/wav",
            AudioMime::Mpeg => "audio/mpeg",
        }
    }

    /// Conventional file extension for this MIME type.
    pub fn extension(self) -> &'static str {
        match self {
            AudioMime::Wav => "wav",
            AudioMime::Mpeg => "mp3",
        }
    }
}

/// An encoded, ready-to-play/download audio byte sequence.
///
/// Immutable once created; moved (not cloned) into whichever consumer —
/// playback or download — takes ownership.
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    bytes: Vec<u8>,
    mime: AudioMime,
}

impl AudioArtifact {
    pub fn new(bytes: Vec<u8>, mime: AudioMime) -> Self {
        Self { bytes, mime }
    }

    pub fn wav(bytes: Vec<u8>) -> Self {
        Self::new(bytes, AudioMime::Wav)
    }

    pub fn mpeg(bytes: Vec<u8>) -> Self {
        Self::new(bytes, AudioMime::Mpeg)
    }

    pub fn mime(&self) -> AudioMime {
        self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Decode any artifact into PCM: WAV by header sniff, MPEG otherwise.
pub fn decode_artifact(artifact: &AudioArtifact) -> crate::error::Result<SampleBuffer> {
    let bytes = artifact.as_bytes();
    if bytes.starts_with(b"RIFF") {
        wav::decode_wav(bytes)
    } else {
        mpeg::decode_mpeg(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unequal_channel_lengths() {
        let err = SampleBuffer::new(vec![vec![0.0; 10], vec![0.0; 9]], 44_100);
        assert!(matches!(err, Err(EloquiError::InvalidBuffer(_))));
    }

    #[test]
    fn downmix_averages_channels() {
        let buffer = SampleBuffer::new(vec![vec![1.0, 0.0], vec![0.0, 0.0]], 44_100)
            .unwrap()
            .downmix_mono();
        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.channel(0), &[0.5, 0.0]);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let buffer = SampleBuffer::mono(vec![0.0; 22_050], 44_100);
        assert!((buffer.duration_secs() - 0.5).abs() < 1e-9);
    }
}
