//! Per-call conversion configuration.
//!
//! There is deliberately no module-level singleton for the API key or the
//! local-engine flag: the host owns a `ConversionConfig` and passes it into
//! every `convert`/`download` call. Components never mutate it.

use std::time::Duration;

/// Configuration injected into each conversion or download request.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// API key for the keyed remote voice endpoint. `None` means that tier
    /// reports capability-absent and the ladder advances.
    pub api_key: Option<String>,
    /// Prefer the local speech engine over remote synthesis.
    pub use_local_engine: bool,
    /// BCP 47 language tag, e.g. "es-ES".
    pub language: String,
    /// Voice id override. `None` selects by language prefix.
    pub voice_id: Option<String>,
    /// Speaking rate multiplier. Default: 1.0.
    pub rate: f32,
    /// Voice pitch multiplier. Default: 1.0.
    pub pitch: f32,
    /// Sample rate used for locally produced audio (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Maximum characters per remote request for length-limited endpoints.
    /// Default: 200.
    pub max_chunk_chars: usize,
    /// Safety margin added to the estimated speech duration when recording
    /// a local capture. Default: 5 s.
    pub capture_margin: Duration,
    /// Per-request timeout for remote endpoints. Default: 10 s.
    pub request_timeout: Duration,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            use_local_engine: true,
            language: "es-ES".into(),
            voice_id: None,
            rate: 1.0,
            pitch: 1.0,
            sample_rate: 44_100,
            max_chunk_chars: 200,
            capture_margin: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ConversionConfig {
    /// Clamp every field into its working range. Call once at the host
    /// boundary; the core assumes a normalized config.
    pub fn normalize(&mut self) {
        self.rate = self.rate.clamp(0.25, 4.0);
        self.pitch = self.pitch.clamp(0.5, 2.0);
        self.sample_rate = self.sample_rate.clamp(8_000, 96_000);
        self.max_chunk_chars = self.max_chunk_chars.clamp(16, 2_000);
        self.capture_margin = self
            .capture_margin
            .clamp(Duration::from_secs(1), Duration::from_secs(30));
        self.request_timeout = self
            .request_timeout
            .clamp(Duration::from_secs(1), Duration::from_secs(120));
        self.api_key = self
            .api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.voice_id = self
            .voice_id
            .as_ref()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let language = self.language.trim();
        self.language = if language.is_empty() {
            "es-ES".into()
        } else {
            language.to_string()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_out_of_range_fields() {
        let mut cfg = ConversionConfig {
            rate: 100.0,
            pitch: 0.0,
            sample_rate: 1,
            max_chunk_chars: 0,
            api_key: Some("   ".into()),
            language: "".into(),
            ..ConversionConfig::default()
        };
        cfg.normalize();
        assert_eq!(cfg.rate, 4.0);
        assert_eq!(cfg.pitch, 0.5);
        assert_eq!(cfg.sample_rate, 8_000);
        assert_eq!(cfg.max_chunk_chars, 16);
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.language, "es-ES");
    }

    #[test]
    fn normalize_keeps_valid_fields() {
        let mut cfg = ConversionConfig::default();
        cfg.api_key = Some("sk-test".into());
        cfg.normalize();
        assert_eq!(cfg.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.sample_rate, 44_100);
    }
}
