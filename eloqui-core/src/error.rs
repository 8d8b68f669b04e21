use thiserror::Error;

/// All errors produced by eloqui-core.
#[derive(Debug, Error)]
pub enum EloquiError {
    #[error("input text is empty")]
    EmptyText,

    #[error("capability absent: {0}")]
    CapabilityAbsent(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("invalid sample buffer: {0}")]
    InvalidBuffer(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("recorder is already running")]
    AlreadyRecording,

    #[error("recorder is not running")]
    NotRecording,

    #[error("every synthesis strategy failed: {0}")]
    StrategiesExhausted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EloquiError {
    /// Whether a strategy ladder should advance past this error rather than
    /// surface it. Capability-absent and transport/decode failures are
    /// recoverable at a tier boundary; exhaustion and invalid input are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EloquiError::CapabilityAbsent(_)
                | EloquiError::Transport(_)
                | EloquiError::Decode(_)
                | EloquiError::Playback(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EloquiError>;
