//! Playback controller.
//!
//! At most one playback session exists at a time: starting a new one first
//! stops whatever is active (stop-then-start, never concurrent), because
//! the host audio output is implicitly singular. `Ended` fires exactly once
//! per session — on manual stop and on natural completion alike, so
//! subscribers must not read it as "finished successfully".

pub mod sink;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::codec::{decode_artifact, AudioArtifact};
use crate::error::Result;
use crate::events::PlaybackEvent;
use crate::synth::{EngineHandle, SpeakEvent, SpeakOptions};

use sink::AudioSink;

/// Broadcast capacity for playback events.
const BROADCAST_CAP: usize = 64;

/// What to play: a decoded artifact through the sink, or text through the
/// speech engine.
pub enum PlaybackSource {
    Artifact(AudioArtifact),
    Text(String),
}

enum Backend {
    Sink,
    Utterance,
}

struct ActiveSession {
    record_id: Option<i64>,
    /// Guards the one `Ended` per session.
    ended: Arc<AtomicBool>,
    backend: Backend,
}

pub struct PlaybackController {
    engine: EngineHandle,
    sink: Arc<Mutex<Box<dyn AudioSink>>>,
    session: Arc<Mutex<Option<ActiveSession>>>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackController {
    pub fn new(engine: EngineHandle, sink: Box<dyn AudioSink>) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            engine,
            sink: Arc::new(Mutex::new(sink)),
            session: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Start a playback session. Stops any active session first; its
    /// `Ended` is emitted before this session's `Started`.
    pub fn play(
        &self,
        source: PlaybackSource,
        record_id: Option<i64>,
        options: &SpeakOptions,
    ) -> Result<()> {
        self.stop();

        let ended = Arc::new(AtomicBool::new(false));

        let backend = match source {
            PlaybackSource::Artifact(artifact) => {
                let buffer = match decode_artifact(&artifact) {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = self.events.send(PlaybackEvent::Error {
                            record_id,
                            reason: e.to_string(),
                        });
                        return Err(e);
                    }
                };

                let on_complete = self.completion_handler(record_id, Arc::clone(&ended));
                if let Err(e) = self.sink.lock().start(buffer, Box::new(on_complete)) {
                    let _ = self.events.send(PlaybackEvent::Error {
                        record_id,
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
                Backend::Sink
            }

            PlaybackSource::Text(text) => {
                let mut rx = match self.engine.0.speak(&text, options) {
                    Ok(rx) => rx,
                    Err(e) => {
                        let _ = self.events.send(PlaybackEvent::Error {
                            record_id,
                            reason: e.to_string(),
                        });
                        return Err(e);
                    }
                };

                let finish = self.completion_handler(record_id, Arc::clone(&ended));
                let events = self.events.clone();
                tokio::spawn(async move {
                    let mut finish = Some(finish);
                    while let Some(event) = rx.recv().await {
                        match event {
                            SpeakEvent::Started => {}
                            SpeakEvent::Ended => {
                                if let Some(finish) = finish.take() {
                                    finish();
                                }
                                break;
                            }
                            SpeakEvent::Error { reason } => {
                                warn!(reason = reason.as_str(), "utterance error");
                                let _ = events.send(PlaybackEvent::Error {
                                    record_id,
                                    reason,
                                });
                                if let Some(finish) = finish.take() {
                                    finish();
                                }
                                break;
                            }
                        }
                    }
                });
                Backend::Utterance
            }
        };

        *self.session.lock() = Some(ActiveSession {
            record_id,
            ended,
            backend,
        });
        let _ = self.events.send(PlaybackEvent::Started { record_id });
        debug!(?record_id, "playback session started");
        Ok(())
    }

    /// Stop the active session, if any. Idempotent: a stop with nothing
    /// playing produces no events.
    pub fn stop(&self) {
        let Some(active) = self.session.lock().take() else {
            return;
        };

        match active.backend {
            Backend::Sink => self.sink.lock().stop(),
            Backend::Utterance => self.engine.0.cancel(),
        }

        if !active.ended.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(PlaybackEvent::Ended {
                record_id: active.record_id,
            });
        }
        debug!(record_id = ?active.record_id, "playback session stopped");
    }

    /// Natural-completion path shared by both backends. Emits the session's
    /// single `Ended` and clears the slot, but only if this session is
    /// still the active one.
    fn completion_handler(
        &self,
        record_id: Option<i64>,
        ended: Arc<AtomicBool>,
    ) -> impl FnOnce() + Send + 'static {
        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        move || {
            if ended.swap(true, Ordering::SeqCst) {
                return;
            }
            let mut slot = session.lock();
            if let Some(active) = slot.as_ref() {
                if Arc::ptr_eq(&active.ended, &ended) {
                    *slot = None;
                }
            }
            let _ = events.send(PlaybackEvent::Ended { record_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{tone::generate_tone, wav};
    use crate::error::EloquiError;
    use crate::synth::oscillator::OscillatorVoice;
    use super::sink::CompletionFn;

    /// Scripted sink: records calls, lets the test fire natural completion.
    #[derive(Default)]
    struct ScriptedSink {
        state: Arc<Mutex<ScriptedState>>,
    }

    #[derive(Default)]
    struct ScriptedState {
        starts: usize,
        stops: usize,
        pending: Option<CompletionFn>,
    }

    impl ScriptedSink {
        fn shared(&self) -> Arc<Mutex<ScriptedState>> {
            Arc::clone(&self.state)
        }
    }

    impl AudioSink for ScriptedSink {
        fn start(
            &mut self,
            _buffer: crate::codec::SampleBuffer,
            on_complete: CompletionFn,
        ) -> Result<()> {
            let mut state = self.state.lock();
            state.starts += 1;
            state.pending = Some(on_complete);
            Ok(())
        }

        fn stop(&mut self) {
            let mut state = self.state.lock();
            state.stops += 1;
            state.pending = None;
        }
    }

    fn controller_with_scripted_sink() -> (PlaybackController, Arc<Mutex<ScriptedState>>) {
        let sink = ScriptedSink::default();
        let shared = sink.shared();
        let controller =
            PlaybackController::new(EngineHandle::new(OscillatorVoice::new(8_000)), Box::new(sink));
        (controller, shared)
    }

    fn tone_artifact() -> AudioArtifact {
        wav::encode_wav(&generate_tone(0.2, 8_000))
    }

    #[tokio::test]
    async fn stop_on_idle_controller_produces_no_events() {
        let (controller, _) = controller_with_scripted_sink();
        let mut rx = controller.subscribe();
        controller.stop();
        controller.stop();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn starting_b_stops_a_first() {
        let (controller, state) = controller_with_scripted_sink();
        let mut rx = controller.subscribe();

        controller
            .play(PlaybackSource::Artifact(tone_artifact()), Some(1), &SpeakOptions::default())
            .unwrap();
        controller
            .play(PlaybackSource::Artifact(tone_artifact()), Some(2), &SpeakOptions::default())
            .unwrap();

        // A's teardown precedes B's Started.
        assert!(matches!(
            rx.recv().await.unwrap(),
            PlaybackEvent::Started { record_id: Some(1) }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PlaybackEvent::Ended { record_id: Some(1) }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PlaybackEvent::Started { record_id: Some(2) }
        ));

        let state = state.lock();
        assert_eq!(state.starts, 2);
        assert!(state.stops >= 1);
    }

    #[tokio::test]
    async fn natural_completion_fires_ended_exactly_once() {
        let (controller, state) = controller_with_scripted_sink();
        let mut rx = controller.subscribe();

        controller
            .play(PlaybackSource::Artifact(tone_artifact()), Some(7), &SpeakOptions::default())
            .unwrap();
        assert!(controller.is_playing());

        let finish = state.lock().pending.take().expect("completion handler");
        finish();
        assert!(!controller.is_playing());

        // A stop after completion must not emit a second Ended.
        controller.stop();

        assert!(matches!(
            rx.recv().await.unwrap(),
            PlaybackEvent::Started { record_id: Some(7) }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PlaybackEvent::Ended { record_id: Some(7) }
        ));
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn text_playback_ends_once_on_manual_stop() {
        let (controller, _) = controller_with_scripted_sink();
        let mut rx = controller.subscribe();

        controller
            .play(
                PlaybackSource::Text("Hola mundo".into()),
                None,
                &SpeakOptions::default(),
            )
            .unwrap();
        controller.stop();

        assert!(matches!(
            rx.recv().await.unwrap(),
            PlaybackEvent::Started { record_id: None }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PlaybackEvent::Ended { record_id: None }
        ));

        // The engine's own Ended event arrives later; the session flag
        // already consumed this session's Ended.
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn undecodable_artifact_surfaces_error_event() {
        let (controller, _) = controller_with_scripted_sink();
        let mut rx = controller.subscribe();

        let garbage = AudioArtifact::mpeg(vec![0u8; 16]);
        let err = controller
            .play(PlaybackSource::Artifact(garbage), Some(3), &SpeakOptions::default())
            .unwrap_err();
        assert!(matches!(err, EloquiError::Decode(_)));
        assert!(!controller.is_playing());
        assert!(matches!(
            rx.recv().await.unwrap(),
            PlaybackEvent::Error { record_id: Some(3), .. }
        ));
    }
}
