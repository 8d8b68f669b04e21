//! Audio output sink.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `CpalSink` therefore creates and drops the stream on one
//! dedicated thread; the controller talks to it over channels only.

#[cfg(feature = "audio-cpal")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::codec::SampleBuffer;
use crate::error::Result;

/// Callback invoked exactly once when the last frame has been rendered.
/// Not invoked when playback is stopped early.
pub type CompletionFn = Box<dyn FnOnce() + Send>;

/// Contract for playback backends.
pub trait AudioSink: Send + 'static {
    /// Start playing `buffer`. Any previous playback is stopped first.
    ///
    /// # Errors
    /// `EloquiError::CapabilityAbsent` when no output device exists,
    /// `EloquiError::Playback` if the stream cannot be built.
    fn start(&mut self, buffer: SampleBuffer, on_complete: CompletionFn) -> Result<()>;

    /// Stop playback and release the device. Idempotent.
    fn stop(&mut self);
}

/// Default sink over the system output device.
#[derive(Default)]
pub struct CpalSink {
    #[cfg(feature = "audio-cpal")]
    stop_tx: Option<crossbeam_channel::Sender<()>>,
    #[cfg(feature = "audio-cpal")]
    worker: Option<std::thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioSink for CpalSink {
    fn start(&mut self, buffer: SampleBuffer, on_complete: CompletionFn) -> Result<()> {
        use crate::error::EloquiError;

        self.stop();

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        // Sync handshake: the worker reports whether the device opened.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let worker = std::thread::spawn(move || {
            run_output(buffer, on_complete, stop_rx, ready_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(EloquiError::Playback("output thread died during open".into()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Owns the cpal stream for the lifetime of one playback.
#[cfg(feature = "audio-cpal")]
fn run_output(
    buffer: SampleBuffer,
    on_complete: CompletionFn,
    stop_rx: crossbeam_channel::Receiver<()>,
    ready_tx: crossbeam_channel::Sender<Result<()>>,
) {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use crate::codec::resample::RateConverter;
    use crate::error::EloquiError;

    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(EloquiError::CapabilityAbsent(
            "no default output device".into(),
        )));
        return;
    };

    let supported = match device.default_output_config() {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(EloquiError::Playback(format!("output config: {e}"))));
            return;
        }
    };
    let out_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;

    let samples = match RateConverter::convert_buffer(buffer, out_rate) {
        Ok(b) => Arc::new(b.channel(0).to_vec()),
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        let config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(out_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                        pos += 1;
                    }
                    position.store(pos, Ordering::Relaxed);
                    if pos >= samples.len() {
                        finished.store(true, Ordering::Release);
                    }
                },
                |err| tracing::error!("output stream error: {err}"),
                None,
            ),
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                        for out in frame.iter_mut() {
                            *out = value;
                        }
                        pos += 1;
                    }
                    position.store(pos, Ordering::Relaxed);
                    if pos >= samples.len() {
                        finished.store(true, Ordering::Release);
                    }
                },
                |err| tracing::error!("output stream error: {err}"),
                None,
            ),
            fmt => {
                let _ = ready_tx.send(Err(EloquiError::Playback(format!(
                    "unsupported output format: {fmt:?}"
                ))));
                return;
            }
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(EloquiError::Playback(format!("build stream: {e}"))));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(EloquiError::Playback(format!("play: {e}"))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Wait for natural completion or an explicit stop; the stream drops on
    // this thread either way.
    let mut stopped = false;
    loop {
        if finished.load(Ordering::Acquire) {
            break;
        }
        match stop_rx.recv_timeout(std::time::Duration::from_millis(20)) {
            Ok(()) => {
                stopped = true;
                break;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                stopped = true;
                break;
            }
        }
    }
    drop(stream);

    if !stopped {
        on_complete();
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioSink for CpalSink {
    fn start(&mut self, _buffer: SampleBuffer, _on_complete: CompletionFn) -> Result<()> {
        Err(crate::error::EloquiError::CapabilityAbsent(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn stop(&mut self) {}
}
