//! Keyed neural TTS endpoint (alternative tier, no hard length limit).

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::codec::AudioArtifact;
use crate::error::{EloquiError, Result};
use crate::remote::{read_audio_response, transport_error, RemoteVoice};

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io/v1";

/// Spanish default voice.
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";

const API_KEY_HEADER: &str = "xi-api-key";

#[derive(Debug, Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
    model_id: &'a str,
}

pub struct NeuralTts {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    voice_id: String,
    model_id: String,
}

impl NeuralTts {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, timeout)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            voice_id: DEFAULT_VOICE_ID.into(),
            model_id: DEFAULT_MODEL_ID.into(),
        }
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }

    fn request_url(&self) -> String {
        format!("{}/text-to-speech/{}", self.base_url, self.voice_id)
    }
}

#[async_trait]
impl RemoteVoice for NeuralTts {
    fn name(&self) -> &str {
        "neural-tts"
    }

    async fn synthesize(&self, text: &str, _language: &str) -> Result<AudioArtifact> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(EloquiError::CapabilityAbsent(
                "neural-tts: API key not configured".into(),
            ));
        };

        debug!(
            chars = text.chars().count(),
            voice = self.voice_id.as_str(),
            "neural-tts request"
        );

        let response = self
            .client
            .post(self.request_url())
            .header(API_KEY_HEADER, api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&SynthesisBody {
                text,
                model_id: &self.model_id,
            })
            .send()
            .await
            .map_err(|e| transport_error(self.name(), e))?;

        let bytes = read_audio_response(self.name(), response).await?;
        Ok(AudioArtifact::mpeg(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_embeds_the_voice() {
        let tts = NeuralTts::with_base_url(
            "https://voices.example/v1",
            Some("key".into()),
            Duration::from_secs(5),
        )
        .with_voice("abc123");
        assert_eq!(
            tts.request_url(),
            "https://voices.example/v1/text-to-speech/abc123"
        );
    }

    #[tokio::test]
    async fn missing_api_key_is_capability_absent() {
        let tts = NeuralTts::new(None, Duration::from_secs(5));
        let err = tts.synthesize("Hola", "es-ES").await.unwrap_err();
        assert!(matches!(err, EloquiError::CapabilityAbsent(_)));
    }
}
