//! Eloqui host application entry point.
//!
//! A headless CLI over the conversion engine: it owns settings, the
//! per-user history store, and all user-facing output. The core never
//! prints; this binary renders its results and errors.

mod commands;
mod settings;
mod storage;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use eloqui_core::EloquiEngine;

use settings::{default_settings_path, load_settings};
use storage::LocalStore;

#[derive(Parser)]
#[command(name = "eloqui", version, about = "Text-to-speech conversion engine")]
struct Cli {
    /// Settings file override.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert text to audio and append it to the history.
    Convert {
        text: String,
        /// Service/category tag recorded with the conversion.
        #[arg(long, default_value = "illustrator")]
        service: String,
        /// Source file name hint recorded with the conversion.
        #[arg(long)]
        file_name: Option<String>,
        /// Also save the artifact under this path.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Speak text aloud through the engine.
    Speak { text: String },
    /// Synthesize text and save it as an audio file.
    Download {
        text: String,
        #[arg(short, long, default_value = "eloqui-audio.wav")]
        output: PathBuf,
        /// Language tag override, e.g. "es-ES".
        #[arg(long)]
        language: Option<String>,
    },
    /// Replay a conversion from the history.
    Play { id: i64 },
    /// Record from a capture device and save the extracted audio.
    Record {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        #[arg(short, long, default_value = "captura.wav")]
        output: PathBuf,
        /// Prefer a system-output (loopback) device over the microphone.
        #[arg(long)]
        system_audio: bool,
    },
    /// List available synthesis voices.
    Voices,
    /// Inspect or prune the conversion history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Show or change persisted settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Filter by text content.
        #[arg(long)]
        query: Option<String>,
    },
    Stats {
        #[arg(long, default_value_t = 30)]
        days: usize,
    },
    Clear {
        #[arg(long)]
        older_than_days: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        use_local_engine: Option<bool>,
        #[arg(long)]
        language: Option<String>,
        /// Active user email (history key).
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        rate: Option<f32>,
        #[arg(long)]
        pitch: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);

    let store = LocalStore::new(LocalStore::default_db_path()).map_err(|e| anyhow!(e))?;
    if settings.history_enabled {
        match store.prune_history(settings.retention_days) {
            Ok(0) => {}
            Ok(pruned) => warn!(pruned, "pruned conversions past retention"),
            Err(e) => warn!(error = e.as_str(), "history prune failed"),
        }
    }

    let engine = EloquiEngine::with_default_backends(&settings.conversion_config());

    match cli.command {
        Command::Convert {
            text,
            service,
            file_name,
            save,
        } => commands::convert(&engine, &settings, &store, text, service, file_name, save).await,
        Command::Speak { text } => commands::speak(&engine, &settings, text).await,
        Command::Download {
            text,
            output,
            language,
        } => commands::download(&engine, &settings, text, output, language).await,
        Command::Play { id } => commands::play(&engine, &settings, &store, id).await,
        Command::Record {
            seconds,
            output,
            system_audio,
        } => commands::record(&settings, seconds, output, system_audio).await,
        Command::Voices => commands::voices(&engine),
        Command::History { action } => match action {
            HistoryAction::List { page, query } => {
                commands::history_list(&store, &settings, page, query)
            }
            HistoryAction::Stats { days } => commands::history_stats(&store, &settings, days),
            HistoryAction::Clear { older_than_days } => {
                commands::history_clear(&store, &settings, older_than_days)
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&settings),
            ConfigAction::Set {
                api_key,
                use_local_engine,
                language,
                user,
                rate,
                pitch,
            } => commands::config_set(
                &settings_path,
                &mut settings,
                api_key,
                use_local_engine,
                language,
                user,
                rate,
                pitch,
            ),
        },
    }
}
