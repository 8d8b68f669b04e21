//! # eloqui-core
//!
//! Reusable text-to-speech conversion engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! text ──► EloquiEngine::convert ──► CapturePipeline (strategy ladder)
//!                                        │
//!                        external synthesis → local capture → tone
//!                                        │
//!                                 AudioArtifact (WAV / MPEG)
//!                                   │              │
//!                         PlaybackController   DownloadService
//!                          (one session)       (tiered, chunked)
//! ```
//!
//! Every ladder terminates: the tone tier cannot fail, so a request either
//! returns an artifact or was rejected at validation.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod events;
pub mod playback;
pub mod recorder;
pub mod remote;
pub mod synth;
pub mod text;

// Convenience re-exports for downstream crates
pub use codec::{AudioArtifact, AudioMime, SampleBuffer};
pub use config::ConversionConfig;
pub use engine::{ConversionRequest, EloquiEngine};
pub use error::EloquiError;
pub use events::{ConversionRecord, EngineStatus, EngineStatusEvent, PlaybackEvent};
pub use synth::{EngineHandle, SpeechEngine, VoiceInfo};
