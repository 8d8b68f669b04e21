//! Remote voice-synthesis endpoints.
//!
//! Both endpoints are unreliable collaborators: they may be unreachable,
//! rate-limited, or answer with a non-audio payload. Every failure maps to
//! `Transport` or `Decode`, which the strategy ladders treat as "advance to
//! the next tier" — a remote error never surfaces to the caller directly.

pub mod neural;
pub mod translate;

use async_trait::async_trait;

use crate::codec::AudioArtifact;
use crate::error::{EloquiError, Result};

/// A remote text→audio synthesis service.
#[async_trait]
pub trait RemoteVoice: Send + Sync {
    /// Short service name used in logs and receipts.
    fn name(&self) -> &str;

    /// Per-request character limit, for length-limited endpoints.
    fn max_text_len(&self) -> Option<usize> {
        None
    }

    /// Synthesize `text` in `language` and return the encoded audio bytes.
    async fn synthesize(&self, text: &str, language: &str) -> Result<AudioArtifact>;
}

/// Validate a response and pull its audio bytes.
///
/// Non-2xx status is a transport failure; an empty body or a declared
/// non-audio content type is a decode failure (the endpoint answered with
/// an error page or JSON).
pub(crate) async fn read_audio_response(
    service: &str,
    response: reqwest::Response,
) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        return Err(EloquiError::Transport(format!(
            "{service}: status {status}"
        )));
    }

    if let Some(content_type) = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if !content_type.starts_with("audio/")
            && !content_type.starts_with("application/octet-stream")
        {
            return Err(EloquiError::Decode(format!(
                "{service}: non-audio payload ({content_type})"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| EloquiError::Transport(format!("{service}: {e}")))?;
    if bytes.is_empty() {
        return Err(EloquiError::Decode(format!("{service}: empty payload")));
    }
    Ok(bytes.to_vec())
}

/// Map a reqwest error (connect, timeout, body) to the transport variant.
pub(crate) fn transport_error(service: &str, error: reqwest::Error) -> EloquiError {
    EloquiError::Transport(format!("{service}: {error}"))
}
