use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scriptcast::audio::{check_ffmpeg, AudioSynth, AudioWorker, TtsRegistry, VoiceConfig, WorkerScope};
use scriptcast::config::Config;
use scriptcast::content::ContentWorker;
use scriptcast::intake::{self, AppState};
use scriptcast::llm::{ChatModel, OpenAiChat};
use scriptcast::store::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scriptcast")]
#[command(version, about = "Queue-driven narrated-audio generation pipeline")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scope {
    /// Primary-language tasks, chunks processed serially
    Primary,
    /// All other languages, chunks processed in parallel
    Other,
}

#[derive(Subcommand)]
enum Command {
    /// Run the intake HTTP API
    Serve {
        /// Bind address, e.g. 0.0.0.0:5001
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run the content worker (outline + script chunk generation)
    ContentWorker,
    /// Run an audio worker
    AudioWorker {
        #[arg(long, value_enum)]
        scope: Scope,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn shutdown_flag() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    ctrlc::set_handler(move || {
        if flag.load(Ordering::Relaxed) {
            // Second Ctrl+C, force exit
            std::process::exit(1);
        }
        eprintln!("\nReceived Ctrl+C, finishing current work... (press again to force quit)");
        flag.store(true, Ordering::Relaxed);
    })
    .ok();

    shutdown
}

fn chat_client(config: &Config) -> Result<Arc<dyn ChatModel>> {
    config.validate_llm().context("Configuration validation failed")?;
    let api_key = config
        .openai_api_key
        .clone()
        .context("OPENAI_API_KEY not set")?;
    let client = OpenAiChat::new(api_key, config.openai_base_url.clone())
        .context("Failed to build chat client")?;
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Arc::new(Config::load().context("Failed to load configuration")?);
    let store = Store::connect(&config.database_url)
        .await
        .context("Failed to connect to the store")?;

    match cli.command {
        Command::Serve { bind } => {
            let chat = chat_client(&config)?;
            let state = AppState {
                store,
                chat,
                config: config.clone(),
            };
            let bind_addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            intake::serve(state, &bind_addr)
                .await
                .context("Intake API failed")?;
        }
        Command::ContentWorker => {
            let chat = chat_client(&config)?;
            let shutdown = shutdown_flag();
            let worker = ContentWorker::new(store, chat, config.clone());
            worker.run(shutdown).await;
        }
        Command::AudioWorker { scope } => {
            check_ffmpeg(&config.ffmpeg_path).context("FFmpeg is required for audio work")?;

            let registry =
                TtsRegistry::from_config(&config).context("Failed to build TTS providers")?;
            let voices = VoiceConfig::load_or_default(&config.voice_config_file);
            let synth = Arc::new(AudioSynth::new(
                registry,
                config.audio_root.clone(),
                config.tts_char_limit,
                config.ffmpeg_path.clone(),
            ));

            let (worker_scope, interval) = match scope {
                Scope::Primary => (WorkerScope::Primary, config.primary_audio_interval()),
                Scope::Other => (WorkerScope::Other, config.other_audio_interval()),
            };

            info!("Audio root: {}", config.audio_root.display());
            let shutdown = shutdown_flag();
            let worker = AudioWorker::new(
                store,
                synth,
                voices,
                worker_scope,
                config.primary_language.clone(),
                config.chunk_concurrency,
            );
            worker.run(interval, shutdown).await;
        }
    }

    Ok(())
}
