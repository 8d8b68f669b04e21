//! Capture pipeline — the strategy ladder behind "obtain a playable
//! artifact for this text".
//!
//! ## Stages (per request)
//!
//! ```text
//! Idle
//!   └─► TryingExternalSynthesis   (remote endpoint, when configured)
//!         └─► TryingLocalCapture  (speak + record the bridge, timer-bounded)
//!               └─► TryingToneFallback (always terminates with an artifact)
//!                     └─► Done(artifact) | Failed(error)
//! ```
//!
//! Each tier's failure is caught and logged at the tier boundary and the
//! ladder advances; a tier is never retried. `Failed` is reachable only if
//! the tone tier itself failed, which it is designed never to do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::{tone, wav, AudioArtifact};
use crate::config::ConversionConfig;
use crate::error::{EloquiError, Result};
use crate::remote::RemoteVoice;
use crate::synth::{estimate_speech_duration, EngineHandle, SpeakEvent, SpeakOptions};

/// Request state, advanced in order and logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStage {
    Idle,
    TryingExternalSynthesis,
    TryingLocalCapture,
    TryingToneFallback,
    Done,
    Failed,
}

/// The tier that produced the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTier {
    External,
    LocalCapture,
    ToneFallback,
}

/// Shared counters for observability across requests.
#[derive(Default)]
pub struct CaptureDiagnostics {
    pub external_attempts: AtomicUsize,
    pub external_failures: AtomicUsize,
    pub capture_runs: AtomicUsize,
    pub capture_failures: AtomicUsize,
    pub tone_fallbacks: AtomicUsize,
}

impl CaptureDiagnostics {
    pub fn reset(&self) {
        self.external_attempts.store(0, Ordering::Relaxed);
        self.external_failures.store(0, Ordering::Relaxed);
        self.capture_runs.store(0, Ordering::Relaxed);
        self.capture_failures.store(0, Ordering::Relaxed);
        self.tone_fallbacks.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            external_attempts: self.external_attempts.load(Ordering::Relaxed),
            external_failures: self.external_failures.load(Ordering::Relaxed),
            capture_runs: self.capture_runs.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            tone_fallbacks: self.tone_fallbacks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub external_attempts: usize,
    pub external_failures: usize,
    pub capture_runs: usize,
    pub capture_failures: usize,
    pub tone_fallbacks: usize,
}

/// Result of a successful ladder run.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub artifact: AudioArtifact,
    pub from_local_engine: bool,
    pub duration_secs: f64,
    pub tier: CaptureTier,
}

pub struct CapturePipeline {
    engine: EngineHandle,
    /// Remote tier used when the config does not prefer the local engine.
    remote: Option<Arc<dyn RemoteVoice>>,
    diagnostics: Arc<CaptureDiagnostics>,
}

impl CapturePipeline {
    pub fn new(engine: EngineHandle, remote: Option<Arc<dyn RemoteVoice>>) -> Self {
        Self {
            engine,
            remote,
            diagnostics: Arc::new(CaptureDiagnostics::default()),
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Run the ladder for `text`. Validation happens before any tier: blank
    /// input is rejected here, not converted into a tone.
    pub async fn acquire(
        &self,
        text: &str,
        config: &ConversionConfig,
    ) -> Result<CaptureOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EloquiError::EmptyText);
        }

        let estimate = estimate_speech_duration(text, config.rate);
        let mut stage = CaptureStage::Idle;
        debug!(?stage, chars = text.chars().count(), "capture request accepted");

        // ── Tier 1: external synthesis ───────────────────────────────────
        if !config.use_local_engine {
            if let Some(remote) = &self.remote {
                stage = CaptureStage::TryingExternalSynthesis;
                debug!(?stage, service = remote.name(), "capture stage");
                self.diagnostics
                    .external_attempts
                    .fetch_add(1, Ordering::Relaxed);

                match crate::download::fetch_synthesized(
                    remote.as_ref(),
                    text,
                    &config.language,
                    config,
                )
                .await
                {
                    Ok(artifact) => {
                        info!(
                            service = remote.name(),
                            bytes = artifact.len(),
                            "external synthesis succeeded"
                        );
                        return Ok(CaptureOutcome {
                            artifact,
                            from_local_engine: false,
                            duration_secs: estimate.as_secs_f64(),
                            tier: CaptureTier::External,
                        });
                    }
                    Err(e) => {
                        self.diagnostics
                            .external_failures
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(
                            service = remote.name(),
                            error = %e,
                            "external synthesis failed — falling through to local capture"
                        );
                    }
                }
            }
        }

        // ── Tier 2: local capture ────────────────────────────────────────
        stage = CaptureStage::TryingLocalCapture;
        debug!(?stage, "capture stage");
        self.diagnostics.capture_runs.fetch_add(1, Ordering::Relaxed);

        match self.try_local_capture(text, config, estimate).await {
            Ok(artifact) => {
                let duration = estimate.as_secs_f64();
                info!(bytes = artifact.len(), secs = duration, "local capture succeeded");
                return Ok(CaptureOutcome {
                    artifact,
                    from_local_engine: true,
                    duration_secs: duration,
                    tier: CaptureTier::LocalCapture,
                });
            }
            Err(e) => {
                self.diagnostics
                    .capture_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "local capture failed — falling through to tone");
            }
        }

        // ── Tier 3: tone fallback ────────────────────────────────────────
        stage = CaptureStage::TryingToneFallback;
        debug!(?stage, "capture stage");
        self.diagnostics
            .tone_fallbacks
            .fetch_add(1, Ordering::Relaxed);

        let buffer = tone::generate_tone(estimate.as_secs_f64(), config.sample_rate);
        let duration = buffer.duration_secs();
        info!(secs = duration, "tone fallback emitted");
        Ok(CaptureOutcome {
            artifact: wav::encode_wav(&buffer),
            from_local_engine: true,
            duration_secs: duration,
            tier: CaptureTier::ToneFallback,
        })
    }

    /// Speak through the engine while recording its bridge signal.
    ///
    /// The recording window is the duration estimate plus the configured
    /// safety margin; a timer bounds the capture — never the speech-end
    /// event, since the two are not reliably correlated.
    async fn try_local_capture(
        &self,
        text: &str,
        config: &ConversionConfig,
        estimate: Duration,
    ) -> Result<AudioArtifact> {
        let options = SpeakOptions::from_config(config);
        let window = estimate + config.capture_margin;

        let mut events = self.engine.0.speak(text, &options)?;

        let engine = Arc::clone(&self.engine.0);
        let text_owned = text.to_string();
        let render_options = options.clone();
        let render = tokio::task::spawn_blocking(move || {
            engine.render_bridge(&text_owned, &render_options, window)
        });

        let buffer = match tokio::time::timeout(window, render).await {
            Ok(joined) => joined
                .map_err(|e| EloquiError::Playback(format!("bridge task: {e}")))??,
            Err(_) => {
                self.engine.0.cancel();
                return Err(EloquiError::Playback(
                    "bridge capture exceeded its timer window".into(),
                ));
            }
        };

        // The utterance may outlive the capture window; recording already
        // ended, so tear it down.
        self.engine.0.cancel();

        // Surface an engine-reported failure if one arrived meanwhile.
        while let Ok(event) = events.try_recv() {
            if let SpeakEvent::Error { reason } = event {
                return Err(EloquiError::Playback(format!("engine error: {reason}")));
            }
        }

        if buffer.is_empty() {
            return Err(EloquiError::Decode("bridge produced no samples".into()));
        }
        Ok(wav::encode_wav(&buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::oscillator::OscillatorVoice;
    use crate::synth::{SpeechEngine, VoiceInfo};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Remote double that always refuses.
    struct DownService;

    #[async_trait]
    impl RemoteVoice for DownService {
        fn name(&self) -> &str {
            "down"
        }
        async fn synthesize(&self, _text: &str, _language: &str) -> Result<AudioArtifact> {
            Err(EloquiError::Transport("down: connection refused".into()))
        }
    }

    /// Engine double without the synthesis capability.
    struct AbsentEngine;

    impl SpeechEngine for AbsentEngine {
        fn voices(&self) -> Vec<VoiceInfo> {
            vec![]
        }
        fn speak(
            &self,
            _text: &str,
            _options: &SpeakOptions,
        ) -> Result<mpsc::UnboundedReceiver<SpeakEvent>> {
            Err(EloquiError::CapabilityAbsent("no speech engine".into()))
        }
        fn cancel(&self) {}
        fn render_bridge(
            &self,
            _text: &str,
            _options: &SpeakOptions,
            _max: Duration,
        ) -> Result<crate::codec::SampleBuffer> {
            Err(EloquiError::CapabilityAbsent("no speech engine".into()))
        }
    }

    fn test_config() -> ConversionConfig {
        ConversionConfig {
            sample_rate: 8_000,
            capture_margin: Duration::from_secs(1),
            ..ConversionConfig::default()
        }
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_any_tier() {
        let pipeline = CapturePipeline::new(
            EngineHandle::new(OscillatorVoice::new(8_000)),
            Some(Arc::new(DownService)),
        );
        let err = pipeline.acquire("   ", &test_config()).await.unwrap_err();
        assert!(matches!(err, EloquiError::EmptyText));
        let snap = pipeline.diagnostics_snapshot();
        assert_eq!(snap.external_attempts, 0);
        assert_eq!(snap.capture_runs, 0);
        assert_eq!(snap.tone_fallbacks, 0);
    }

    #[tokio::test]
    async fn local_engine_mode_skips_the_external_tier() {
        let pipeline = CapturePipeline::new(
            EngineHandle::new(OscillatorVoice::new(8_000)),
            Some(Arc::new(DownService)),
        );
        let outcome = pipeline
            .acquire("Hola mundo", &test_config())
            .await
            .expect("acquire");
        assert!(outcome.from_local_engine);
        assert_eq!(outcome.tier, CaptureTier::LocalCapture);
        assert!(outcome.duration_secs >= 3.0);
        assert!(!outcome.artifact.is_empty());
        assert_eq!(pipeline.diagnostics_snapshot().external_attempts, 0);
    }

    #[tokio::test]
    async fn remote_failure_falls_through_to_local_capture() {
        let pipeline = CapturePipeline::new(
            EngineHandle::new(OscillatorVoice::new(8_000)),
            Some(Arc::new(DownService)),
        );
        let config = ConversionConfig {
            use_local_engine: false,
            ..test_config()
        };
        let outcome = pipeline.acquire("Hola mundo", &config).await.expect("acquire");
        assert_eq!(outcome.tier, CaptureTier::LocalCapture);
        let snap = pipeline.diagnostics_snapshot();
        assert_eq!(snap.external_attempts, 1);
        assert_eq!(snap.external_failures, 1);
    }

    #[tokio::test]
    async fn absent_engine_lands_on_the_tone_fallback() {
        let pipeline = CapturePipeline::new(EngineHandle::new(AbsentEngine), None);
        let outcome = pipeline
            .acquire("Hola mundo", &test_config())
            .await
            .expect("acquire");
        assert_eq!(outcome.tier, CaptureTier::ToneFallback);
        assert!(!outcome.artifact.is_empty());
        // The tone artifact is a decodable WAV of the estimated duration.
        let decoded = crate::codec::wav::decode_wav(outcome.artifact.as_bytes()).unwrap();
        assert!((decoded.duration_secs() - 3.0).abs() < 0.05);
        assert_eq!(pipeline.diagnostics_snapshot().tone_fallbacks, 1);
    }
}
