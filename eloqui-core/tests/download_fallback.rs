//! End-to-end behavior of the download tiers and the capture ladder,
//! exercised with scripted remote/engine doubles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use eloqui_core::codec::{tone, wav, AudioArtifact, SampleBuffer};
use eloqui_core::download::{DownloadService, DownloadTier};
use eloqui_core::engine::capture::CapturePipeline;
use eloqui_core::error::{EloquiError, Result};
use eloqui_core::remote::RemoteVoice;
use eloqui_core::synth::{SpeakEvent, SpeakOptions, SpeechEngine, VoiceInfo};
use eloqui_core::{ConversionConfig, EngineHandle};

/// Remote double: counts calls, answers each request with a fixed-length
/// WAV (or refuses, when scripted to fail).
struct ScriptedVoice {
    calls: Arc<AtomicUsize>,
    limit: Option<usize>,
    chunk_secs: f64,
    fail: bool,
}

impl ScriptedVoice {
    fn serving(limit: Option<usize>, chunk_secs: f64) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                calls: Arc::clone(&calls),
                limit,
                chunk_secs,
                fail: false,
            }),
            calls,
        )
    }

    fn failing(limit: Option<usize>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                calls: Arc::clone(&calls),
                limit,
                chunk_secs: 0.0,
                fail: true,
            }),
            calls,
        )
    }
}

#[async_trait]
impl RemoteVoice for ScriptedVoice {
    fn name(&self) -> &str {
        "scripted"
    }

    fn max_text_len(&self) -> Option<usize> {
        self.limit
    }

    async fn synthesize(&self, _text: &str, _language: &str) -> Result<AudioArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EloquiError::Transport("scripted: unreachable".into()));
        }
        let buffer = SampleBuffer::mono(
            vec![0.25; (22_050.0 * self.chunk_secs) as usize],
            22_050,
        );
        Ok(wav::encode_wav(&buffer))
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
    ) -> Result<SampleBuffer> {
        Err(EloquiError::CapabilityAbsent("no speech engine".into()))
    }
}

fn test_config() -> ConversionConfig {
    ConversionConfig {
        sample_rate: 22_050,
        capture_margin: Duration::from_secs(1),
        ..ConversionConfig::default()
    }
}

fn temp_dest(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("eloqui-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    dir.join(name)
}

/// Three sentences of exactly 200 characters each.
fn six_hundred_chars() -> String {
    let sentence = |filler: char| {
        let mut s = filler.to_string().repeat(199);
        s.push('.');
        s
    };
    format!("{} {} {}", sentence('a'), sentence('b'), sentence('c'))
}

#[tokio::test]
async fn chunked_download_fetches_exactly_three_times() {
    let (primary, calls) = ScriptedVoice::serving(Some(200), 0.5);
    let capture = Arc::new(CapturePipeline::new(EngineHandle::new(AbsentEngine), None));
    let service = DownloadService::new(Some(primary), None, capture);

    let dest = temp_dest("three-chunks.wav");
    let receipt = service
        .download(&six_hundred_chars(), "es-ES", &dest, &test_config())
        .await
        .expect("download");

    assert_eq!(calls.load(Ordering::SeqCst), 3, "one fetch per chunk");
    assert_eq!(receipt.tier, DownloadTier::Primary);

    // One concatenated artifact whose duration is the sum of the chunks.
    let decoded = wav::decode_wav(&std::fs::read(&receipt.path).unwrap()).unwrap();
    assert_eq!(decoded.channel_count(), 1);
    assert!(
        (decoded.duration_secs() - 1.5).abs() < 0.05,
        "duration {} ≉ 3 × 0.5 s",
        decoded.duration_secs()
    );
    assert!((receipt.duration_secs - 1.5).abs() < 0.05);

    let _ = std::fs::remove_file(&receipt.path);
}

#[tokio::test]
async fn short_text_is_fetched_in_a_single_call() {
    let (primary, calls) = ScriptedVoice::serving(Some(200), 0.5);
    let capture = Arc::new(CapturePipeline::new(EngineHandle::new(AbsentEngine), None));
    let service = DownloadService::new(Some(primary), None, capture);

    let dest = temp_dest("single-call.wav");
    let receipt = service
        .download("Hola mundo.", "es-ES", &dest, &test_config())
        .await
        .expect("download");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let _ = std::fs::remove_file(&receipt.path);
}

#[tokio::test]
async fn alternate_tier_serves_when_the_primary_fails() {
    let (primary, primary_calls) = ScriptedVoice::failing(Some(200));
    let (alternate, alternate_calls) = ScriptedVoice::serving(None, 1.0);
    let capture = Arc::new(CapturePipeline::new(EngineHandle::new(AbsentEngine), None));
    let service = DownloadService::new(Some(primary), Some(alternate), capture);

    let dest = temp_dest("alternate.wav");
    let receipt = service
        .download("Hola mundo.", "es-ES", &dest, &test_config())
        .await
        .expect("download");

    assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    assert_eq!(alternate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(receipt.tier, DownloadTier::Alternate);
    let _ = std::fs::remove_file(&receipt.path);
}

#[tokio::test]
async fn download_still_completes_when_every_remote_tier_fails() {
    let (primary, _) = ScriptedVoice::failing(Some(200));
    let (alternate, _) = ScriptedVoice::failing(None);
    // The engine is absent too: only the tone fallback is left standing.
    let capture = Arc::new(CapturePipeline::new(EngineHandle::new(AbsentEngine), None));
    let service = DownloadService::new(Some(primary), Some(alternate), capture);

    let dest = temp_dest("tone-fallback.wav");
    let config = test_config();
    let receipt = service
        .download("Hola mundo, esto es una prueba.", "es-ES", &dest, &config)
        .await
        .expect("download must still complete");

    assert_eq!(receipt.tier, DownloadTier::Capture);

    // The file is the tone generator's WAV: mono, peak ≤ 0.5, ≈ the
    // 3-second estimate floor for a short text.
    let decoded = wav::decode_wav(&std::fs::read(&receipt.path).unwrap()).unwrap();
    assert_eq!(decoded.channel_count(), 1);
    let peak = decoded
        .channel(0)
        .iter()
        .fold(0f32, |acc, s| acc.max(s.abs()));
    assert!(peak <= 0.5 + 1e-3, "peak={peak}");
    assert!((decoded.duration_secs() - 3.0).abs() < 0.1);

    // And it matches what the tone generator itself produces.
    let reference = tone::generate_tone(3.0, config.sample_rate);
    assert_eq!(decoded.frames(), reference.frames());

    let _ = std::fs::remove_file(&receipt.path);
}

#[tokio::test]
async fn empty_input_is_rejected_before_any_fetch() {
    let (primary, calls) = ScriptedVoice::serving(Some(200), 0.5);
    let capture = Arc::new(CapturePipeline::new(EngineHandle::new(AbsentEngine), None));
    let service = DownloadService::new(Some(primary), None, capture);

    let dest = temp_dest("rejected.wav");
    let err = service
        .download("   ", "es-ES", &dest, &test_config())
        .await
        .unwrap_err();

    assert!(matches!(err, EloquiError::EmptyText));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "no strategy may run");
    assert!(!dest.exists());
}

#[tokio::test]
async fn dropped_chunks_leave_a_gap_but_not_a_failure() {
    /// Fails every second request.
    struct Flaky {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteVoice for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn max_text_len(&self) -> Option<usize> {
            Some(200)
        }
        async fn synthesize(&self, _text: &str, _language: &str) -> Result<AudioArtifact> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                return Err(EloquiError::Transport("flaky: timeout".into()));
            }
            let buffer = SampleBuffer::mono(vec![0.25; 11_025], 22_050);
            Ok(wav::encode_wav(&buffer))
        }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let primary = Arc::new(Flaky {
        calls: Arc::clone(&calls),
    });
    let capture = Arc::new(CapturePipeline::new(EngineHandle::new(AbsentEngine), None));
    let service = DownloadService::new(Some(primary), None, capture);

    let dest = temp_dest("gappy.wav");
    let receipt = service
        .download(&six_hundred_chars(), "es-ES", &dest, &test_config())
        .await
        .expect("partial result still downloads");

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(receipt.tier, DownloadTier::Primary);
    // Two of three chunks decoded; the dropped one shortens the file.
    let decoded = wav::decode_wav(&std::fs::read(&receipt.path).unwrap()).unwrap();
    assert!((decoded.duration_secs() - 1.0).abs() < 0.05);

    let _ = std::fs::remove_file(&receipt.path);
}
