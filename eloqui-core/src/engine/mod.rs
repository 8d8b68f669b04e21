//! `EloquiEngine` — top-level conversion facade.
//!
//! ## Lifecycle of a conversion
//!
//! ```text
//! EloquiEngine::convert(request, config)
//!     └─► validate (empty text rejected before any strategy)
//!         └─► CapturePipeline::acquire    → artifact + tier
//!             └─► ConversionRecord        → returned to the host
//! ```
//!
//! The engine is `Send + Sync` — all fields use interior mutability. Wrap
//! in `Arc<EloquiEngine>` to share between the host and event-forwarding
//! tasks.

pub mod capture;

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::ConversionConfig;
use crate::download::{DownloadReceipt, DownloadService};
use crate::error::{EloquiError, Result};
use crate::events::{ConversionRecord, EngineStatus, EngineStatusEvent};
use crate::playback::{sink::AudioSink, sink::CpalSink, PlaybackController, PlaybackSource};
use crate::remote::{neural::NeuralTts, translate::TranslateTts, RemoteVoice};
use crate::synth::{oscillator::OscillatorVoice, EngineHandle, SpeakOptions, VoiceInfo};

use capture::CapturePipeline;

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 256;

/// Input from the host for one conversion.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub text: String,
    /// Overrides the config language when set.
    pub language: Option<String>,
    /// Name of the uploaded source file, if any.
    pub file_name: Option<String>,
    /// Service/category tag recorded in history.
    pub service_category: String,
}

impl ConversionRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            file_name: None,
            service_category: "default".into(),
        }
    }
}

pub struct EloquiEngine {
    capture: Arc<CapturePipeline>,
    download: DownloadService,
    playback: PlaybackController,
    status: Arc<Mutex<EngineStatus>>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    last_record_id: AtomicI64,
}

impl EloquiEngine {
    /// Wire an engine from explicit parts. `alternate` serves both the
    /// direct-conversion path and the second download tier; `primary` is
    /// the chunked first download tier.
    pub fn new(
        engine: EngineHandle,
        primary: Option<Arc<dyn RemoteVoice>>,
        alternate: Option<Arc<dyn RemoteVoice>>,
        sink: Box<dyn AudioSink>,
    ) -> Self {
        let capture = Arc::new(CapturePipeline::new(engine.clone(), alternate.clone()));
        let download = DownloadService::new(primary, alternate, Arc::clone(&capture));
        let playback = PlaybackController::new(engine, sink);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            capture,
            download,
            playback,
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            status_tx,
            last_record_id: AtomicI64::new(0),
        }
    }

    /// Default wiring: oscillator voice, translate-style primary endpoint,
    /// keyed neural alternate, cpal output sink.
    pub fn with_default_backends(config: &ConversionConfig) -> Self {
        let engine = EngineHandle::new(OscillatorVoice::new(config.sample_rate));
        let primary: Arc<dyn RemoteVoice> = Arc::new(TranslateTts::new(config.request_timeout));
        let alternate: Arc<dyn RemoteVoice> = Arc::new(NeuralTts::new(
            config.api_key.clone(),
            config.request_timeout,
        ));
        Self::new(
            engine,
            Some(primary),
            Some(alternate),
            Box::new(CpalSink::new()),
        )
    }

    /// Convert text to an audio artifact and build its record.
    ///
    /// Empty/blank text is rejected before any strategy executes.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
        config: &ConversionConfig,
    ) -> Result<ConversionRecord> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(EloquiError::EmptyText);
        }
        let effective = self.effective_config(request, config);

        self.set_status(
            if effective.use_local_engine {
                EngineStatus::Capturing
            } else {
                EngineStatus::Synthesizing
            },
            None,
        );

        let outcome = match self.capture.acquire(text, &effective).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                return Err(e);
            }
        };
        self.set_status(EngineStatus::Idle, None);

        let id = self.next_record_id();
        let record = ConversionRecord {
            id,
            text: text.to_string(),
            date: chrono::Utc::now().to_rfc3339(),
            service_type: request.service_category.clone(),
            file_name: request.file_name.clone(),
            duration_secs: outcome.duration_secs,
            from_local_engine: outcome.from_local_engine,
            audio_url: None,
            audio: Some(outcome.artifact),
        };
        info!(
            id,
            tier = ?outcome.tier,
            from_local = record.from_local_engine,
            "conversion complete"
        );
        Ok(record)
    }

    /// Synthesize and save a downloadable file under `dest`.
    pub async fn download(
        &self,
        request: &ConversionRequest,
        config: &ConversionConfig,
        dest: &Path,
    ) -> Result<DownloadReceipt> {
        let effective = self.effective_config(request, config);
        self.set_status(EngineStatus::Downloading, None);
        let language = effective.language.clone();
        match self
            .download
            .download(&request.text, &language, dest, &effective)
            .await
        {
            Ok(receipt) => {
                self.set_status(EngineStatus::Idle, None);
                Ok(receipt)
            }
            Err(e) => {
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Play a record's artifact, generating it lazily on first playback.
    /// The only mutation a record ever sees is that backfill.
    pub async fn play_record(
        &self,
        record: &mut ConversionRecord,
        config: &ConversionConfig,
    ) -> Result<()> {
        if record.audio.is_none() {
            let outcome = self.capture.acquire(&record.text, config).await?;
            record.audio = Some(outcome.artifact);
        }
        let artifact = match record.audio.clone() {
            Some(artifact) => artifact,
            None => return Err(EloquiError::Playback("record holds no artifact".into())),
        };
        self.playback.play(
            PlaybackSource::Artifact(artifact),
            Some(record.id),
            &SpeakOptions::from_config(config),
        )
    }

    /// Speak text directly through the engine (no record involved).
    pub fn speak(&self, text: &str, config: &ConversionConfig) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EloquiError::EmptyText);
        }
        self.playback.play(
            PlaybackSource::Text(text.to_string()),
            None,
            &SpeakOptions::from_config(config),
        )
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.capture.engine().0.voices()
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of capture-ladder counters for observability.
    pub fn capture_diagnostics(&self) -> capture::DiagnosticsSnapshot {
        self.capture.diagnostics_snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn effective_config(
        &self,
        request: &ConversionRequest,
        config: &ConversionConfig,
    ) -> ConversionConfig {
        let mut effective = config.clone();
        if let Some(language) = &request.language {
            effective.language = language.clone();
        }
        effective.normalize();
        effective
    }

    /// Monotonic millisecond-timestamp ids: two conversions in the same
    /// millisecond still get distinct, ordered ids.
    fn next_record_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .last_record_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1)
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}
