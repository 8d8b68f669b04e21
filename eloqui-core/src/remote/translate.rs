//! Translate-style TTS endpoint (no key required, ~200-char input limit).

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::codec::AudioArtifact;
use crate::error::Result;
use crate::remote::{read_audio_response, transport_error, RemoteVoice};
use crate::text::DEFAULT_MAX_CHUNK_CHARS;

const DEFAULT_BASE_URL: &str = "https://translate.google.com/translate_tts";

pub struct TranslateTts {
    client: reqwest::Client,
    base_url: String,
}

impl TranslateTts {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn query(text: &str, language: &str) -> [(&'static str, String); 4] {
        [
            ("ie", "UTF-8".into()),
            ("q", text.to_string()),
            ("tl", language.to_string()),
            ("client", "tw-ob".into()),
        ]
    }
}

#[async_trait]
impl RemoteVoice for TranslateTts {
    fn name(&self) -> &str {
        "translate-tts"
    }

    fn max_text_len(&self) -> Option<usize> {
        Some(DEFAULT_MAX_CHUNK_CHARS)
    }

    async fn synthesize(&self, text: &str, language: &str) -> Result<AudioArtifact> {
        debug!(chars = text.chars().count(), language, "translate-tts request");
        let response = self
            .client
            .get(&self.base_url)
            .query(&Self::query(text, language))
            .send()
            .await
            .map_err(|e| transport_error(self.name(), e))?;

        let bytes = read_audio_response(self.name(), response).await?;
        Ok(AudioArtifact::mpeg(bytes))
    }
}
