//! Downloadable-audio service.
//!
//! Turns text into a saved audio file through three tiers, each attempted
//! only if the previous one failed: the primary (length-limited) endpoint
//! with chunked fetch-decode-concatenate, the alternate keyed endpoint, and
//! finally the capture pipeline. The write itself goes through a scoped
//! temp file that is removed on every failure path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::{
    decode_artifact, resample::RateConverter, wav, AudioArtifact, AudioMime, SampleBuffer,
};
use crate::config::ConversionConfig;
use crate::engine::capture::CapturePipeline;
use crate::error::{EloquiError, Result};
use crate::remote::RemoteVoice;
use crate::text::chunk_text;

/// Which tier produced the downloaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadTier {
    Primary,
    Alternate,
    Capture,
}

/// Outcome of a completed download.
#[derive(Debug)]
pub struct DownloadReceipt {
    pub path: PathBuf,
    pub bytes: usize,
    pub mime: AudioMime,
    pub tier: DownloadTier,
    /// Approximate audio duration in seconds. For the chunked path this is
    /// the frame-count sum of the chunks that decoded; dropped chunks
    /// shorten it.
    pub duration_secs: f64,
}

pub struct DownloadService {
    primary: Option<Arc<dyn RemoteVoice>>,
    alternate: Option<Arc<dyn RemoteVoice>>,
    capture: Arc<CapturePipeline>,
}

impl DownloadService {
    pub fn new(
        primary: Option<Arc<dyn RemoteVoice>>,
        alternate: Option<Arc<dyn RemoteVoice>>,
        capture: Arc<CapturePipeline>,
    ) -> Self {
        Self {
            primary,
            alternate,
            capture,
        }
    }

    /// Synthesize `text` and save it under `dest` (extension forced to the
    /// artifact's MIME type). Fails only if every tier fails.
    pub async fn download(
        &self,
        text: &str,
        language: &str,
        dest: &Path,
        config: &ConversionConfig,
    ) -> Result<DownloadReceipt> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EloquiError::EmptyText);
        }

        let remote_tiers = [
            (DownloadTier::Primary, self.primary.as_ref()),
            (DownloadTier::Alternate, self.alternate.as_ref()),
        ];

        for (tier, remote) in remote_tiers {
            let Some(remote) = remote else { continue };
            match fetch_synthesized(remote.as_ref(), text, language, config).await {
                Ok(artifact) => {
                    let duration = artifact_duration(&artifact, text, config);
                    let (path, bytes) = save_artifact(&artifact, dest)?;
                    info!(
                        ?tier,
                        service = remote.name(),
                        bytes,
                        path = %path.display(),
                        "download complete"
                    );
                    return Ok(DownloadReceipt {
                        path,
                        bytes,
                        mime: artifact.mime(),
                        tier,
                        duration_secs: duration,
                    });
                }
                Err(e) => {
                    warn!(?tier, service = remote.name(), error = %e, "download tier failed");
                }
            }
        }

        // Last tier: the capture pipeline, entered at its local-capture rung
        // (the remote tiers above already had their chance).
        let local_config = ConversionConfig {
            use_local_engine: true,
            ..config.clone()
        };
        let outcome = self.capture.acquire(text, &local_config).await?;
        let (path, bytes) = save_artifact(&outcome.artifact, dest)?;
        info!(
            tier = ?DownloadTier::Capture,
            capture_tier = ?outcome.tier,
            bytes,
            path = %path.display(),
            "download complete"
        );
        Ok(DownloadReceipt {
            path,
            bytes,
            mime: outcome.artifact.mime(),
            tier: DownloadTier::Capture,
            duration_secs: outcome.duration_secs,
        })
    }
}

/// Fetch synthesized audio from one endpoint, chunking when the text
/// exceeds the endpoint's limit.
pub(crate) async fn fetch_synthesized(
    remote: &dyn RemoteVoice,
    text: &str,
    language: &str,
    config: &ConversionConfig,
) -> Result<AudioArtifact> {
    match remote.max_text_len() {
        Some(limit) if text.chars().count() > limit => {
            fetch_chunked(remote, text, language, config, limit.min(config.max_chunk_chars)).await
        }
        _ => remote.synthesize(text, language).await,
    }
}

/// Per-chunk fetch → decode → resample → concatenate → encode once.
///
/// A chunk that fails to fetch or decode is logged and omitted — a silent
/// gap in an otherwise complete file beats no file. The tier fails only
/// when no chunk yields audio.
async fn fetch_chunked(
    remote: &dyn RemoteVoice,
    text: &str,
    language: &str,
    config: &ConversionConfig,
    limit: usize,
) -> Result<AudioArtifact> {
    let chunks = chunk_text(text, limit);
    let target_rate = config.sample_rate;
    let mut combined: Vec<f32> = Vec::new();
    let mut dropped = 0usize;

    debug!(chunks = chunks.len(), limit, "chunked fetch starting");

    for (index, chunk) in chunks.iter().enumerate() {
        let decoded = match remote.synthesize(chunk, language).await {
            Ok(artifact) => decode_artifact(&artifact)
                .and_then(|buffer| RateConverter::convert_buffer(buffer, target_rate)),
            Err(e) => Err(e),
        };
        match decoded {
            Ok(buffer) => {
                debug!(index, frames = buffer.frames(), "chunk decoded");
                combined.extend_from_slice(buffer.channel(0));
            }
            Err(e) => {
                dropped += 1;
                warn!(index, error = %e, "chunk dropped — leaving a silent gap");
            }
        }
    }

    if combined.is_empty() {
        return Err(EloquiError::Decode(format!(
            "{}: no chunk produced audio ({dropped} dropped)",
            remote.name()
        )));
    }
    if dropped > 0 {
        info!(dropped, kept = chunks.len() - dropped, "chunked fetch finished with gaps");
    }

    Ok(wav::encode_wav(&SampleBuffer::mono(combined, target_rate)))
}

/// Duration estimate for a finished artifact: decoded length when the bytes
/// are WAV, the speech estimate otherwise (compressed payloads are opaque).
fn artifact_duration(artifact: &AudioArtifact, text: &str, config: &ConversionConfig) -> f64 {
    match artifact.mime() {
        AudioMime::Wav => wav::decode_wav(artifact.as_bytes())
            .map(|b| b.duration_secs())
            .unwrap_or(0.0),
        AudioMime::Mpeg => {
            crate::synth::estimate_speech_duration(text, config.rate).as_secs_f64()
        }
    }
}

/// Write the artifact under `dest` via a temp file, forcing the extension
/// to match the MIME type. The temp file never outlives this call.
pub(crate) fn save_artifact(artifact: &AudioArtifact, dest: &Path) -> Result<(PathBuf, usize)> {
    let final_path = dest.with_extension(artifact.mime().extension());
    if let Some(parent) = final_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = TempGuard::new(final_path.with_extension("part"));
    std::fs::write(temp_path.path(), artifact.as_bytes())?;
    std::fs::rename(temp_path.path(), &final_path)?;
    temp_path.disarm();

    Ok((final_path, artifact.len()))
}

/// Removes the temp file on drop unless the rename landed.
struct TempGuard {
    path: PathBuf,
    armed: std::cell::Cell<bool>,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            armed: std::cell::Cell::new(true),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(&self) {
        self.armed.set(false);
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed.get() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
