//! Persistent application settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use eloqui_core::ConversionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// History is keyed per user; this is the active user's email.
    pub user_email: String,
    /// API key for the keyed neural endpoint.
    pub api_key: Option<String>,
    /// Prefer the local speech engine over remote synthesis.
    pub use_local_engine: bool,
    pub language: String,
    pub voice_id: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub sample_rate: u32,
    pub history_enabled: bool,
    pub retention_days: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            user_email: "invitado@eloqui.local".into(),
            api_key: None,
            use_local_engine: true,
            language: "es-ES".into(),
            voice_id: None,
            rate: 1.0,
            pitch: 1.0,
            sample_rate: 44_100,
            history_enabled: true,
            retention_days: 90,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.user_email = self.user_email.trim().to_ascii_lowercase();
        if self.user_email.is_empty() {
            self.user_email = "invitado@eloqui.local".into();
        }
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
        self.rate = self.rate.clamp(0.25, 4.0);
        self.pitch = self.pitch.clamp(0.5, 2.0);
        self.sample_rate = self.sample_rate.clamp(8_000, 96_000);
        self.retention_days = self.retention_days.clamp(1, 3650);
    }

    /// Build the per-call core config from these settings.
    pub fn conversion_config(&self) -> ConversionConfig {
        let mut config = ConversionConfig {
            api_key: self.api_key.clone(),
            use_local_engine: self.use_local_engine,
            language: self.language.clone(),
            voice_id: self.voice_id.clone(),
            rate: self.rate,
            pitch: self.pitch,
            sample_rate: self.sample_rate,
            ..ConversionConfig::default()
        };
        config.normalize();
        config
    }
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Eloqui")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("eloqui")
    }
}

pub fn default_settings_path() -> PathBuf {
    default_data_dir().join("settings.json")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(settings)?;
    fs::write(path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fills_empty_fields_with_defaults() {
        let mut settings = AppSettings {
            user_email: "  ".into(),
            language: "".into(),
            api_key: Some("  ".into()),
            rate: 50.0,
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.user_email, "invitado@eloqui.local");
        assert_eq!(settings.language, "es-ES");
        assert_eq!(settings.api_key, None);
        assert_eq!(settings.rate, 4.0);
    }

    #[test]
    fn settings_round_trip_through_disk() {
        let dir = std::env::temp_dir().join(format!("eloqui-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let mut settings = AppSettings::default();
        settings.user_email = "Ana@Example.COM".into();
        settings.api_key = Some("sk-123".into());
        settings.use_local_engine = false;
        settings.normalize();

        save_settings(&path, &settings).expect("save");
        let loaded = load_settings(&path);
        assert_eq!(loaded.user_email, "ana@example.com");
        assert_eq!(loaded.api_key.as_deref(), Some("sk-123"));
        assert!(!loaded.use_local_engine);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let loaded = load_settings(Path::new("/nonexistent/eloqui/settings.json"));
        assert_eq!(loaded.language, "es-ES");
        assert!(loaded.use_local_engine);
    }
}
