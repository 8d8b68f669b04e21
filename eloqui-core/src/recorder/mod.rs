//! Media recorder — the auxiliary capture path.
//!
//! Records from a capture device (loopback when available, microphone as
//! the attach-fallback) into a lock-free SPSC ring drained by a worker
//! thread. A configured-duration timer and manual `stop()` converge on the
//! worker's single exit, so stream teardown happens exactly once no matter
//! which path fired first.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send`; the stream lives entirely on the worker
//! thread, like every other device handle in this crate.

pub mod device;

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{
    resample::RateConverter, tone::generate_tone, wav, AudioArtifact, AudioMime, SampleBuffer,
};
use crate::error::{EloquiError, Result};

/// Ring capacity: 2^21 f32 samples ≈ 43 s at 48 kHz — enough to ride out a
/// slow drain during finalization.
#[cfg(feature = "audio-cpal")]
const RING_CAPACITY: usize = 1 << 21;

/// Worker sleep while the ring is empty.
#[cfg(feature = "audio-cpal")]
const DRAIN_IDLE: Duration = Duration::from_millis(5);

/// Recorder-path duration estimate floor and margin (seconds).
const RECORDING_FLOOR_SECS: f64 = 10.0;
const RECORDING_MARGIN_SECS: f64 = 5.0;

/// Fallback tone length when extraction recovers nothing.
const EXTRACTION_FALLBACK_SECS: f64 = 3.0;

/// Options for one recording run.
#[derive(Debug, Clone, Default)]
pub struct RecorderOptions {
    /// Auto-stop after this long. `None` records until `stop()`.
    pub duration: Option<Duration>,
    /// Prefer a loopback/system-output device over the default microphone.
    pub prefer_system_audio: bool,
}

/// Estimate how long a recording of `text` being spoken needs, with the
/// recorder's own floor and safety margin.
pub fn estimate_recording_duration(text: &str) -> Duration {
    let words = text.chars().count() as f64 / 5.0;
    let seconds = (words / 150.0 * 60.0).ceil().max(RECORDING_FLOOR_SECS);
    Duration::from_secs_f64(seconds + RECORDING_MARGIN_SECS)
}

struct RecorderShared {
    /// Cleared to end the worker loop (by timer deadline or `stop()`).
    running: AtomicBool,
    /// Captured mono samples, drained from the ring by the worker.
    samples: Mutex<Vec<f32>>,
    /// Actual capture rate, reported once the device opens.
    sample_rate: AtomicU32,
}

pub struct MediaRecorder {
    shared: Arc<RecorderShared>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl MediaRecorder {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RecorderShared {
                running: AtomicBool::new(false),
                samples: Mutex::new(Vec::new()),
                sample_rate: AtomicU32::new(44_100),
            }),
            worker: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Start capturing.
    ///
    /// # Errors
    /// - `EloquiError::AlreadyRecording` when a run is active.
    /// - `EloquiError::CapabilityAbsent` when no capture device exists.
    #[cfg(feature = "audio-cpal")]
    pub fn start(&mut self, options: RecorderOptions) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(EloquiError::AlreadyRecording);
        }
        self.shared.samples.lock().clear();

        let shared = Arc::clone(&self.shared);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        let worker = std::thread::spawn(move || {
            capture_worker(shared, options, ready_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                info!(rate, "recording started");
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                self.shared.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                self.shared.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(EloquiError::Playback("capture thread died during open".into()))
            }
        }
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn start(&mut self, _options: RecorderOptions) -> Result<()> {
        Err(EloquiError::CapabilityAbsent(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Stop recording and return the captured audio, `None` when nothing
    /// was captured (or no run was active). Safe to call after the
    /// auto-stop timer already ended the run.
    pub fn stop(&mut self) -> Option<AudioArtifact> {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        let samples = std::mem::take(&mut *self.shared.samples.lock());
        if samples.is_empty() {
            debug!("stop with no captured samples");
            return None;
        }
        let rate = self.shared.sample_rate.load(Ordering::SeqCst);
        info!(samples = samples.len(), rate, "recording finalized");
        Some(wav::encode_wav(&SampleBuffer::mono(samples, rate)))
    }
}

impl Default for MediaRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MediaRecorder {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Worker: owns the stream, drains the ring, enforces the deadline.
/// Its single exit is the one finalize point — the stream drops here.
#[cfg(feature = "audio-cpal")]
fn capture_worker(
    shared: Arc<RecorderShared>,
    options: RecorderOptions,
    ready_tx: crossbeam_channel::Sender<Result<u32>>,
) {
    use ringbuf::{
        traits::{Consumer, Split},
        HeapRb,
    };

    let (producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();

    let stream = match open_capture_stream(producer, &options, Arc::clone(&shared)) {
        Ok((stream, rate)) => {
            shared.sample_rate.store(rate, Ordering::SeqCst);
            let _ = ready_tx.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let deadline = options.duration.map(|d| std::time::Instant::now() + d);
    let mut scratch = vec![0f32; 4_096];

    loop {
        let n = consumer.pop_slice(&mut scratch);
        if n > 0 {
            shared.samples.lock().extend_from_slice(&scratch[..n]);
        } else {
            std::thread::sleep(DRAIN_IDLE);
        }

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        if let Some(deadline) = deadline {
            if std::time::Instant::now() >= deadline {
                info!("recording timer expired — finalizing");
                shared.running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    // Final drain after the stream is told to go quiet.
    let n = consumer.pop_slice(&mut scratch);
    if n > 0 {
        shared.samples.lock().extend_from_slice(&scratch[..n]);
    }
    drop(stream);
}

/// Open a capture stream, preferring a loopback device when asked, then the
/// default microphone, then the first device available.
#[cfg(feature = "audio-cpal")]
fn open_capture_stream(
    mut producer: ringbuf::HeapProd<f32>,
    options: &RecorderOptions,
    shared: Arc<RecorderShared>,
) -> Result<(cpal::Stream, u32)> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use ringbuf::traits::Producer;

    let host = cpal::default_host();

    let mut selected = None;
    if options.prefer_system_audio {
        if let Ok(mut devices) = host.input_devices() {
            selected = devices.find(|d| {
                d.name()
                    .map(|n| device::is_loopback_like_name(&n))
                    .unwrap_or(false)
            });
        }
        if selected.is_none() {
            warn!("no loopback-like device — attaching the default microphone instead");
        }
    }

    let device = match selected.or_else(|| host.default_input_device()) {
        Some(d) => d,
        None => {
            let mut devices = host
                .input_devices()
                .map_err(|e| EloquiError::CapabilityAbsent(e.to_string()))?;
            devices.next().ok_or_else(|| {
                EloquiError::CapabilityAbsent("no capture device available".into())
            })?
        }
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening capture device"
    );

    let supported = device
        .default_input_config()
        .map_err(|e| EloquiError::CapabilityAbsent(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;

    let config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let running = Arc::clone(&shared);
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running.running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / channels;
                    mix_buf.resize(frames, 0.0);
                    for f in 0..frames {
                        let base = f * channels;
                        let sum: f32 = data[base..base + channels].iter().sum();
                        mix_buf[f] = sum / channels as f32;
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
                    }
                },
                |err| tracing::error!("capture stream error: {err}"),
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !running.running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / channels;
                    mix_buf.resize(frames, 0.0);
                    for f in 0..frames {
                        let base = f * channels;
                        let sum: f32 = data[base..base + channels]
                            .iter()
                            .map(|s| *s as f32 / 32768.0)
                            .sum();
                        mix_buf[f] = sum / channels as f32;
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
                    }
                },
                |err| tracing::error!("capture stream error: {err}"),
                None,
            )
        }
        fmt => {
            return Err(EloquiError::Playback(format!(
                "unsupported capture format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| EloquiError::Playback(e.to_string()))?;

    stream
        .play()
        .map_err(|e| EloquiError::Playback(e.to_string()))?;

    Ok((stream, sample_rate))
}

/// Recover an audio-only artifact from a captured one.
///
/// Four independent strategies run in order — direct pass-through,
/// re-record through the rate converter, raw-PCM salvage, tone fallback —
/// and the **largest** successful result wins. Size is a completeness
/// proxy, not a correctness guarantee; ties keep the earlier strategy.
pub fn extract_audio(media: &AudioArtifact, sample_rate: u32) -> AudioArtifact {
    let mut best: Option<(&'static str, AudioArtifact)> = None;
    let mut consider = |name: &'static str, artifact: AudioArtifact| {
        debug!(strategy = name, bytes = artifact.len(), "extraction candidate");
        if best
            .as_ref()
            .map_or(true, |(_, held)| artifact.len() > held.len())
        {
            best = Some((name, artifact));
        }
    };

    // 1. Direct: the capture already is a playable WAV audio track.
    if media.mime() == AudioMime::Wav && wav::decode_wav(media.as_bytes()).is_ok() {
        consider("direct", media.clone());
    }

    // 2. Re-record: decode whatever it is and render at the recorder rate.
    if let Ok(buffer) = crate::codec::decode_artifact(media) {
        if let Ok(converted) = RateConverter::convert_buffer(buffer, sample_rate) {
            if !converted.is_empty() {
                consider("rerecord", wav::encode_wav(&converted));
            }
        }
    }

    // 3. Salvage: dig the PCM payload out from under a damaged header.
    if let Some(buffer) = wav::salvage_pcm(media.as_bytes()) {
        consider("salvage", wav::encode_wav(&buffer));
    }

    // 4. Tone: guarantee a playable result.
    let (strategy, artifact) = match best {
        Some(found) => found,
        None => (
            "tone",
            wav::encode_wav(&generate_tone(EXTRACTION_FALLBACK_SECS, sample_rate)),
        ),
    };
    info!(strategy, bytes = artifact.len(), "extraction strategy selected");
    artifact
}

/// Extract audio from `media` and save it under `dest`.
pub fn extract_audio_to(
    media: &AudioArtifact,
    dest: &std::path::Path,
    sample_rate: u32,
) -> Result<std::path::PathBuf> {
    let artifact = extract_audio(media, sample_rate);
    let (path, _) = crate::download::save_artifact(&artifact, dest)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_estimate_has_floor_plus_margin() {
        // Short text: 10 s floor + 5 s margin.
        assert_eq!(
            estimate_recording_duration("Hola"),
            Duration::from_secs(15)
        );
        // 1500 chars → 300 words → 120 s + margin.
        let long = "a".repeat(1_500);
        assert_eq!(
            estimate_recording_duration(&long),
            Duration::from_secs(125)
        );
    }

    #[test]
    fn stop_without_start_returns_none() {
        let mut recorder = MediaRecorder::new();
        assert!(!recorder.is_recording());
        assert!(recorder.stop().is_none());
    }

    #[test]
    fn extraction_prefers_the_largest_recovered_artifact() {
        // A healthy WAV: direct pass-through and re-record both succeed;
        // direct (the original bytes, longest) must win.
        let buffer = generate_tone(1.0, 44_100);
        let media = wav::encode_wav(&buffer);
        let extracted = extract_audio(&media, 22_050);
        assert_eq!(extracted.len(), media.len());
    }

    #[test]
    fn extraction_salvages_a_corrupted_capture() {
        let buffer = generate_tone(0.5, 44_100);
        let mut bytes = wav::encode_wav(&buffer).into_bytes();
        bytes[0] = b'X'; // damaged header: direct and re-record both fail
        let media = AudioArtifact::wav(bytes);
        let extracted = extract_audio(&media, 44_100);
        let decoded = wav::decode_wav(extracted.as_bytes()).expect("salvaged wav");
        assert_eq!(decoded.frames(), buffer.frames());
    }

    #[test]
    fn extraction_falls_back_to_a_tone() {
        let media = AudioArtifact::mpeg(vec![0u8; 32]);
        let extracted = extract_audio(&media, 8_000);
        let decoded = wav::decode_wav(extracted.as_bytes()).expect("tone wav");
        assert!((decoded.duration_secs() - EXTRACTION_FALLBACK_SECS).abs() < 0.01);
    }
}
