//! Event and record types crossing the SDK boundary.
//!
//! The host subscribes to engine status and playback events and persists
//! `ConversionRecord`s. JSON casing mirrors what a web front-end expects.

use serde::{Deserialize, Serialize};

use crate::codec::AudioArtifact;

/// One completed text→speech operation.
///
/// Created at the end of a successful conversion and appended to the
/// requesting session's history. Never mutated afterwards, except to
/// backfill `audio` when the artifact is generated lazily on first playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRecord {
    /// Monotonic millisecond-timestamp identifier.
    pub id: i64,
    /// Source text of the conversion.
    pub text: String,
    /// Creation time, RFC 3339.
    pub date: String,
    /// Originating service/category tag (e.g. "illustrator").
    pub service_type: String,
    /// Name of the uploaded source file, if any.
    pub file_name: Option<String>,
    /// Estimated spoken duration in seconds (≥ 3.0).
    pub duration_secs: f64,
    /// Whether the artifact came from the local speech engine rather than
    /// a remote synthesis call.
    pub from_local_engine: bool,
    /// Path or URL of a persisted copy of the artifact, if the host saved one.
    pub audio_url: Option<String>,
    /// In-memory artifact. Not serialized — the host persists bytes itself.
    #[serde(skip)]
    pub audio: Option<AudioArtifact>,
}

/// Current state of the conversion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// No conversion in flight.
    Idle,
    /// A remote endpoint is synthesizing.
    Synthesizing,
    /// The local engine is speaking / being captured.
    Capturing,
    /// A download is being assembled and written out.
    Downloading,
    /// The last operation failed terminally.
    Error,
}

/// Emitted on the status channel whenever the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Playback lifecycle events.
///
/// `Ended` fires exactly once per session, on manual stop and on natural
/// completion alike — subscribers must not read it as "finished
/// successfully".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PlaybackEvent {
    #[serde(rename_all = "camelCase")]
    Started { record_id: Option<i64> },
    #[serde(rename_all = "camelCase")]
    Ended { record_id: Option<i64> },
    #[serde(rename_all = "camelCase")]
    Error { record_id: Option<i64>, reason: String },
}
