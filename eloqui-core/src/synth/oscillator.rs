//! `OscillatorVoice` — the built-in synthesis backend.
//!
//! Produces a deterministic "voice": utterance lifecycle events timed by the
//! duration estimate, and a pitch-stepped oscillator waveform as the
//! capturable bridge signal. Not speech — a stand-in with the same shape,
//! so the full capture/download pipeline can run on hosts without a real
//! engine.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::SampleBuffer;
use crate::error::Result;
use crate::synth::{estimate_speech_duration, SpeakEvent, SpeakOptions, SpeechEngine, VoiceInfo};

/// Poll interval of the speak task's cancel check.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Seconds per pitch segment in the bridge waveform.
const SEGMENT_SECS: f32 = 0.08;

/// Bridge oscillator base frequency (Hz) before pitch scaling.
const BASE_FREQ: f32 = 110.0;

pub struct OscillatorVoice {
    sample_rate: u32,
    /// Set by `cancel()`; the active speak task polls it.
    cancelled: Arc<AtomicBool>,
    /// Generation counter so a cancel only affects the utterance it targeted.
    generation: Arc<AtomicU64>,
}

impl OscillatorVoice {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            cancelled: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for OscillatorVoice {
    fn default() -> Self {
        Self::new(44_100)
    }
}

impl SpeechEngine for OscillatorVoice {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![
            VoiceInfo {
                id: "osc-es".into(),
                name: "Lucía (sintética)".into(),
                language: "es-ES".into(),
                is_default: true,
            },
            VoiceInfo {
                id: "osc-es-mx".into(),
                name: "Mateo (sintética)".into(),
                language: "es-MX".into(),
                is_default: false,
            },
            VoiceInfo {
                id: "osc-en".into(),
                name: "Ada (synthetic)".into(),
                language: "en-US".into(),
                is_default: false,
            },
        ]
    }

    fn speak(
        &self,
        text: &str,
        options: &SpeakOptions,
    ) -> Result<mpsc::UnboundedReceiver<SpeakEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let duration = estimate_speech_duration(text, options.rate);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancelled.store(false, Ordering::SeqCst);

        let cancelled = Arc::clone(&self.cancelled);
        let generations = Arc::clone(&self.generation);

        let voices = self.voices();
        let voice = options
            .voice_id
            .as_deref()
            .and_then(|id| voices.iter().find(|v| v.id == id))
            .or_else(|| crate::synth::pick_voice(&voices, &options.language));

        debug!(
            chars = text.chars().count(),
            secs = duration.as_secs_f64(),
            voice = voice.map(|v| v.id.as_str()).unwrap_or("none"),
            "oscillator utterance starting"
        );

        tokio::spawn(async move {
            let _ = tx.send(SpeakEvent::Started);
            let mut elapsed = Duration::ZERO;
            while elapsed < duration {
                if cancelled.load(Ordering::SeqCst)
                    || generations.load(Ordering::SeqCst) != generation
                {
                    break;
                }
                let step = CANCEL_POLL.min(duration - elapsed);
                tokio::time::sleep(step).await;
                elapsed += step;
            }
            // Ended fires on completion and cancellation alike.
            let _ = tx.send(SpeakEvent::Ended);
        });

        Ok(rx)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn render_bridge(
        &self,
        text: &str,
        options: &SpeakOptions,
        max: Duration,
    ) -> Result<SampleBuffer> {
        let duration = estimate_speech_duration(text, options.rate).min(max);
        let frames = (duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        let bytes = text.as_bytes();
        let segment_frames = ((SEGMENT_SECS / options.rate.max(0.1)) * self.sample_rate as f32)
            .max(1.0) as usize;

        let mut samples = Vec::with_capacity(frames);
        let mut phase = 0f32;
        for i in 0..frames {
            let segment = i / segment_frames;
            // Pitch contour follows the text bytes, so different inputs
            // produce distinguishable waveforms.
            let byte = if bytes.is_empty() {
                0
            } else {
                bytes[segment % bytes.len()]
            };
            let freq = BASE_FREQ * options.pitch * (1.0 + (byte % 12) as f32 / 12.0);
            phase += std::f32::consts::TAU * freq / self.sample_rate as f32;

            // Short intra-segment ramp avoids clicks at pitch steps.
            let pos = (i % segment_frames) as f32 / segment_frames as f32;
            let gate = (pos * 8.0).min(1.0) * ((1.0 - pos) * 8.0).min(1.0);

            samples.push((phase.sin() * 0.3 * gate).clamp(-1.0, 1.0));
        }

        Ok(SampleBuffer::mono(samples, self.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn speak_emits_started_then_ended() {
        let engine = OscillatorVoice::new(16_000);
        let mut rx = engine
            .speak("Hola", &SpeakOptions::default())
            .expect("speak");
        assert_eq!(rx.recv().await, Some(SpeakEvent::Started));
        engine.cancel();
        assert_eq!(rx.recv().await, Some(SpeakEvent::Ended));
    }

    #[tokio::test]
    async fn cancel_with_nothing_active_is_a_no_op() {
        let engine = OscillatorVoice::new(16_000);
        engine.cancel();
        engine.cancel();
        // A later utterance still runs normally.
        let mut rx = engine
            .speak("Hola", &SpeakOptions::default())
            .expect("speak");
        assert_eq!(rx.recv().await, Some(SpeakEvent::Started));
        engine.cancel();
        assert_eq!(rx.recv().await, Some(SpeakEvent::Ended));
    }

    #[test]
    fn bridge_is_deterministic_and_text_dependent() {
        let engine = OscillatorVoice::new(8_000);
        let opts = SpeakOptions::default();
        let max = Duration::from_secs(60);
        let a1 = engine.render_bridge("hola mundo", &opts, max).unwrap();
        let a2 = engine.render_bridge("hola mundo", &opts, max).unwrap();
        let b = engine.render_bridge("otro texto distinto", &opts, max).unwrap();
        assert_eq!(a1.channel(0), a2.channel(0));
        assert_ne!(a1.channel(0), b.channel(0));
    }

    #[test]
    fn bridge_is_clipped_by_the_max_duration() {
        let engine = OscillatorVoice::new(8_000);
        let long_text = "a".repeat(5_000);
        let clipped = engine
            .render_bridge(&long_text, &SpeakOptions::default(), Duration::from_secs(2))
            .unwrap();
        assert_eq!(clipped.frames(), 16_000);
    }
}
