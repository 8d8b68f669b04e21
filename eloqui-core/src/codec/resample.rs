//! Sample-rate conversion via a rubato `FastFixedIn` session.
//!
//! Remote endpoints and capture devices do not agree on a rate: chunked
//! downloads decode each fetched piece independently and the pieces must
//! land at one rate before concatenation, and the extraction path re-records
//! decoded audio at the recorder's rate. When the rates already match the
//! converter is a passthrough and no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::codec::SampleBuffer;
use crate::error::{EloquiError, Result};

/// Input frames handed to rubato per process call.
const CONVERT_CHUNK: usize = 1024;

/// Converts mono f32 audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls until a full chunk accumulates.
    input_buf: Vec<f32>,
    /// Pre-allocated rubato output: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    target_rate: u32,
}

impl RateConverter {
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                output_buf: Vec::new(),
                target_rate,
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            CONVERT_CHUNK,
            1, // mono
        )
        .map_err(|e| EloquiError::Decode(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            output_buf: vec![vec![0f32; max_out]; 1],
            target_rate,
        })
    }

    /// Feed samples, returning whatever full chunks produced (may be empty).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= CONVERT_CHUNK {
            let input_slice = &self.input_buf[..CONVERT_CHUNK];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    tracing::error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..CONVERT_CHUNK);
        }
        result
    }

    /// Flush the residual partial chunk by zero-padding it to a full one.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            return Vec::new();
        }
        let remainder = self.input_buf.len();
        let Some(ref resampler) = self.resampler else {
            return Vec::new();
        };
        // Expected output for the real samples only, not the padding.
        let ratio = resampler.output_frames_max() as f64 / CONVERT_CHUNK as f64;
        let keep = (remainder as f64 * ratio).floor() as usize;

        let pad = vec![0f32; CONVERT_CHUNK - remainder];
        let mut out = self.process(&pad);
        out.truncate(keep);
        out
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// One-shot: convert a whole mono buffer to `target_rate`.
    pub fn convert_buffer(buffer: SampleBuffer, target_rate: u32) -> Result<SampleBuffer> {
        let buffer = buffer.downmix_mono();
        if buffer.sample_rate() == target_rate {
            return Ok(buffer);
        }
        let mut converter = Self::new(buffer.sample_rate(), target_rate)?;
        let mut out = converter.process(buffer.channel(0));
        out.extend(converter.finish());
        Ok(SampleBuffer::mono(out, target_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(44_100, 44_100).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.finish().is_empty());
    }

    #[test]
    fn downrate_halves_sample_count() {
        let buffer = SampleBuffer::mono(vec![0.1; 44_100], 44_100);
        let out = RateConverter::convert_buffer(buffer, 22_050).unwrap();
        assert_eq!(out.sample_rate(), 22_050);
        let expected = 22_050isize;
        assert!(
            (out.frames() as isize - expected).unsigned_abs() <= 64,
            "frames={} expected≈{}",
            out.frames(),
            expected
        );
    }

    #[test]
    fn partial_input_flushes_on_finish() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        // Fewer than a full chunk: nothing until finish.
        let head = rc.process(&vec![0.2f32; 500]);
        assert!(head.is_empty());
        let tail = rc.finish();
        let expected = 500 / 3;
        assert!(
            (tail.len() as isize - expected as isize).unsigned_abs() <= 16,
            "tail={} expected≈{}",
            tail.len(),
            expected
        );
    }

    #[test]
    fn convert_buffer_downmixes_before_resampling() {
        let stereo =
            SampleBuffer::new(vec![vec![0.5; 4_800], vec![-0.5; 4_800]], 48_000).unwrap();
        let out = RateConverter::convert_buffer(stereo, 16_000).unwrap();
        assert_eq!(out.channel_count(), 1);
        // Opposite-phase channels cancel in the mono mix.
        assert!(out.channel(0).iter().all(|s| s.abs() < 1e-3));
    }
}
