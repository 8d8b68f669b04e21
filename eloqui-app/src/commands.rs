//! Subcommand implementations.
//!
//! The single layer where errors become user-visible messages — the core
//! returns structured results and never prints.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use eloqui_core::engine::ConversionRequest;
use eloqui_core::events::PlaybackEvent;
use eloqui_core::recorder::{self, MediaRecorder, RecorderOptions};
use eloqui_core::synth::estimate_speech_duration;
use eloqui_core::EloquiEngine;

use crate::settings::AppSettings;
use crate::storage::LocalStore;

pub async fn convert(
    engine: &EloquiEngine,
    settings: &AppSettings,
    store: &LocalStore,
    text: String,
    service: String,
    file_name: Option<String>,
    save: Option<PathBuf>,
) -> Result<()> {
    let config = settings.conversion_config();
    let request = ConversionRequest {
        text,
        language: None,
        file_name,
        service_category: service,
    };
    let record = engine.convert(&request, &config).await?;

    let audio_path = match (&save, &record.audio) {
        (Some(dest), Some(artifact)) => {
            let path = dest.with_extension(artifact.mime().extension());
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(&path, artifact.as_bytes())
                .with_context(|| format!("writing {}", path.display()))?;
            Some(path.display().to_string())
        }
        _ => None,
    };

    if settings.history_enabled {
        store
            .insert_record(&settings.user_email, &record, audio_path.as_deref())
            .map_err(|e| anyhow!(e))?;
    }

    println!(
        "conversion {} complete — {:.1} s via {}",
        record.id,
        record.duration_secs,
        if record.from_local_engine {
            "local engine"
        } else {
            "remote synthesis"
        }
    );
    if let Some(path) = audio_path {
        println!("audio saved to {path}");
    }
    Ok(())
}

pub async fn speak(engine: &EloquiEngine, settings: &AppSettings, text: String) -> Result<()> {
    let config = settings.conversion_config();
    let mut events = engine.playback().subscribe();
    engine.speak(&text, &config)?;

    // Generous upper bound: the utterance estimate plus slack. The playback
    // controller's Ended is the real finish line.
    let deadline = estimate_speech_duration(&text, config.rate) + Duration::from_secs(5);
    let wait = tokio::time::timeout(deadline, async {
        loop {
            match events.recv().await {
                Ok(PlaybackEvent::Ended { .. }) => break Ok(()),
                Ok(PlaybackEvent::Error { reason, .. }) => break Err(anyhow!(reason)),
                Ok(_) => {}
                Err(_) => break Ok(()),
            }
        }
    })
    .await;

    match wait {
        Ok(result) => result?,
        Err(_) => {
            debug!("utterance outlived its deadline — stopping");
            engine.playback().stop();
        }
    }
    Ok(())
}

pub async fn download(
    engine: &EloquiEngine,
    settings: &AppSettings,
    text: String,
    output: PathBuf,
    language: Option<String>,
) -> Result<()> {
    let config = settings.conversion_config();
    let request = ConversionRequest {
        text,
        language,
        file_name: None,
        service_category: "download".into(),
    };
    let receipt = engine.download(&request, &config, &output).await?;
    println!(
        "saved {} ({} bytes, {}, via {:?} tier, ≈{:.1} s)",
        receipt.path.display(),
        receipt.bytes,
        receipt.mime.as_str(),
        receipt.tier,
        receipt.duration_secs
    );
    Ok(())
}

pub async fn play(
    engine: &EloquiEngine,
    settings: &AppSettings,
    store: &LocalStore,
    id: i64,
) -> Result<()> {
    let config = settings.conversion_config();
    let item = store
        .get_record(&settings.user_email, id)
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| anyhow!("no conversion {id} in history"))?;

    let mut record = item.into_record();
    // Prefer the saved artifact; otherwise the engine backfills lazily.
    if let Some(path) = record.audio_url.clone() {
        if let Ok(bytes) = std::fs::read(&path) {
            record.audio = Some(artifact_from_bytes(bytes, &path));
        }
    }
    let had_audio = record.audio.is_some();

    let mut events = engine.playback().subscribe();
    engine.play_record(&mut record, &config).await?;

    if !had_audio && record.audio.is_some() {
        debug!(id, "artifact generated lazily on first playback");
    }

    let deadline = Duration::from_secs_f64(record.duration_secs.max(3.0)) + Duration::from_secs(5);
    let _ = tokio::time::timeout(deadline, async {
        loop {
            match events.recv().await {
                Ok(PlaybackEvent::Ended { .. }) | Err(_) => break,
                _ => {}
            }
        }
    })
    .await;
    engine.playback().stop();
    Ok(())
}

fn artifact_from_bytes(bytes: Vec<u8>, path: &str) -> eloqui_core::AudioArtifact {
    if path.ends_with(".wav") || bytes.starts_with(b"RIFF") {
        eloqui_core::AudioArtifact::wav(bytes)
    } else {
        eloqui_core::AudioArtifact::mpeg(bytes)
    }
}

pub async fn record(
    settings: &AppSettings,
    seconds: u64,
    output: PathBuf,
    system_audio: bool,
) -> Result<()> {
    let mut recorder = MediaRecorder::new();
    recorder.start(RecorderOptions {
        duration: Some(Duration::from_secs(seconds)),
        prefer_system_audio: system_audio,
    })?;
    println!("recording for {seconds} s…");

    // The recorder's own timer finalizes the run; this wait just paces the CLI.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds + 2);
    while recorder.is_recording() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let Some(media) = recorder.stop() else {
        return Err(anyhow!("no audio captured"));
    };
    let path = recorder::extract_audio_to(&media, &output, settings.sample_rate)?;
    println!("recording saved to {}", path.display());
    Ok(())
}

pub fn voices(engine: &EloquiEngine) -> Result<()> {
    let voices = engine.voices();
    if voices.is_empty() {
        println!("no voices available");
        return Ok(());
    }
    for voice in voices {
        println!(
            "{:<10} {:<8} {}{}",
            voice.id,
            voice.language,
            voice.name,
            if voice.is_default { "  (default)" } else { "" }
        );
    }
    Ok(())
}

pub fn history_list(
    store: &LocalStore,
    settings: &AppSettings,
    page: usize,
    query: Option<String>,
) -> Result<()> {
    let history = store
        .get_history(&settings.user_email, page, 20, query)
        .map_err(|e| anyhow!(e))?;
    if history.items.is_empty() {
        println!("history is empty");
        return Ok(());
    }
    println!(
        "{} conversions for {} (page {}/{})",
        history.total,
        settings.user_email,
        history.page,
        history.total.div_ceil(history.page_size).max(1)
    );
    for item in history.items {
        let preview: String = item.text.chars().take(48).collect();
        println!(
            "{:>14}  {}  {:<12} {:>6.1}s  {}{}",
            item.id,
            &item.created_at[..19.min(item.created_at.len())],
            item.service_type,
            item.duration_secs,
            preview,
            if item.audio_path.is_some() { "  [saved]" } else { "" }
        );
    }
    Ok(())
}

pub fn history_stats(store: &LocalStore, settings: &AppSettings, days: usize) -> Result<()> {
    let stats = store
        .get_stats(&settings.user_email, days)
        .map_err(|e| anyhow!(e))?;
    println!(
        "last {} days: {} conversions, {} chars, {:.1} s of audio, {:.0}% local engine",
        stats.range_days,
        stats.total_conversions,
        stats.total_chars,
        stats.total_audio_secs,
        stats.local_engine_share * 100.0
    );
    for bucket in stats.buckets {
        println!(
            "  {}  {:>4} conversions  {:>7} chars  {:>7.1} s",
            bucket.date, bucket.conversions, bucket.chars, bucket.audio_secs
        );
    }
    Ok(())
}

pub fn history_clear(
    store: &LocalStore,
    settings: &AppSettings,
    older_than_days: Option<usize>,
) -> Result<()> {
    let deleted = store
        .delete_history(&settings.user_email, None, older_than_days)
        .map_err(|e| anyhow!(e))?;
    println!("deleted {deleted} conversions");
    Ok(())
}

pub fn config_show(settings: &AppSettings) -> Result<()> {
    println!("user:             {}", settings.user_email);
    println!(
        "api key:          {}",
        if settings.api_key.is_some() { "set" } else { "absent" }
    );
    println!("use local engine: {}", settings.use_local_engine);
    println!("language:         {}", settings.language);
    println!("rate / pitch:     {} / {}", settings.rate, settings.pitch);
    println!("sample rate:      {} Hz", settings.sample_rate);
    println!("history:          {}", if settings.history_enabled { "on" } else { "off" });
    println!("retention:        {} days", settings.retention_days);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn config_set(
    settings_path: &Path,
    settings: &mut AppSettings,
    api_key: Option<String>,
    use_local_engine: Option<bool>,
    language: Option<String>,
    user: Option<String>,
    rate: Option<f32>,
    pitch: Option<f32>,
) -> Result<()> {
    if let Some(api_key) = api_key {
        settings.api_key = Some(api_key);
    }
    if let Some(use_local_engine) = use_local_engine {
        settings.use_local_engine = use_local_engine;
    }
    if let Some(language) = language {
        settings.language = language;
    }
    if let Some(user) = user {
        settings.user_email = user;
    }
    if let Some(rate) = rate {
        settings.rate = rate;
    }
    if let Some(pitch) = pitch {
        settings.pitch = pitch;
    }
    settings.normalize();
    crate::settings::save_settings(settings_path, settings)?;
    println!("settings saved to {}", settings_path.display());
    Ok(())
}
