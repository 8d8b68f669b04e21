//! Speech engine abstraction.
//!
//! The `SpeechEngine` trait decouples the conversion pipeline from any
//! specific synthesis backend. The built-in [`oscillator::OscillatorVoice`]
//! renders a deterministic synthetic voice; hosts with a platform engine
//! can provide their own implementor.
//!
//! Spoken duration is never directly observable from an engine, so callers
//! estimate it from text length and speaking rate — see
//! [`estimate_speech_duration`].

pub mod oscillator;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::codec::SampleBuffer;
use crate::error::Result;

/// Metadata about one synthesis voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    /// BCP 47 tag, e.g. "es-ES".
    pub language: String,
    pub is_default: bool,
}

/// Options for one utterance.
#[derive(Debug, Clone)]
pub struct SpeakOptions {
    pub language: String,
    pub voice_id: Option<String>,
    pub rate: f32,
    pub pitch: f32,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            language: "es-ES".into(),
            voice_id: None,
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

impl SpeakOptions {
    pub fn from_config(config: &crate::config::ConversionConfig) -> Self {
        Self {
            language: config.language.clone(),
            voice_id: config.voice_id.clone(),
            rate: config.rate,
            pitch: config.pitch,
        }
    }
}

/// Lifecycle events of one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakEvent {
    Started,
    /// Fired on natural completion and on cancellation alike.
    Ended,
    Error { reason: String },
}

/// Contract for speech synthesis backends.
pub trait SpeechEngine: Send + Sync + 'static {
    /// List the voices this engine offers.
    fn voices(&self) -> Vec<VoiceInfo>;

    /// Begin speaking. Returns immediately; lifecycle events arrive on the
    /// returned channel. A host without the capability returns
    /// `EloquiError::CapabilityAbsent`.
    fn speak(&self, text: &str, options: &SpeakOptions)
        -> Result<mpsc::UnboundedReceiver<SpeakEvent>>;

    /// Cancel the active utterance. Idempotent; a no-op when nothing is
    /// speaking.
    fn cancel(&self);

    /// Render the capturable bridge signal for `text`, clipped to `max`.
    ///
    /// No host exposes the live utterance as a tappable stream, so local
    /// capture records this oscillator bridge instead.
    fn render_bridge(
        &self,
        text: &str,
        options: &SpeakOptions,
        max: Duration,
    ) -> Result<SampleBuffer>;
}

/// Thread-safe shared handle to any `SpeechEngine` implementor.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<dyn SpeechEngine>);

impl EngineHandle {
    pub fn new<E: SpeechEngine>(engine: E) -> Self {
        Self(Arc::new(engine))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

/// Baseline speaking pace used for duration estimates.
const WORDS_PER_MINUTE: f32 = 150.0;
/// Words are approximated as five characters each.
const CHARS_PER_WORD: f32 = 5.0;
/// No estimate goes below this, however short the text.
const MIN_SPEECH_SECS: f32 = 3.0;

/// Estimate how long `text` takes to speak at `rate`.
///
/// 150 words/minute baseline, words ≈ chars / 5, divided by the rate
/// multiplier, floored at 3 seconds.
pub fn estimate_speech_duration(text: &str, rate: f32) -> Duration {
    let words = text.chars().count() as f32 / CHARS_PER_WORD;
    let minutes = words / (WORDS_PER_MINUTE * rate.max(0.1));
    Duration::from_secs_f32((minutes * 60.0).max(MIN_SPEECH_SECS))
}

/// Pick a voice for `language`: first voice whose tag starts with the
/// language's primary subtag, else the first voice available.
pub fn pick_voice<'a>(voices: &'a [VoiceInfo], language: &str) -> Option<&'a VoiceInfo> {
    let prefix = language
        .split('-')
        .next()
        .unwrap_or(language)
        .to_ascii_lowercase();
    voices
        .iter()
        .find(|v| v.language.to_ascii_lowercase().starts_with(&prefix))
        .or_else(|| voices.first())
}
