//! Subvox Daemon - speaks translated game subtitles

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use subvoxcache::TranslationCache;
use subvoxd::command::{
    CommandFrameSource, CommandRecognizer, CommandSpeechDevice, CommandTranslator,
};
use subvoxd::sink::ConsoleSink;
use subvoxd::{speech, CaptureLoop, Config, Pipeline, Translator};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Translation database file (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Capture period in milliseconds (overrides config)
    #[arg(long)]
    period_ms: Option<u64>,

    /// Characters below which new text interrupts speech (overrides config)
    #[arg(long)]
    short_text_threshold: Option<usize>,

    /// Print translations as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Capture, translate and speak until Ctrl+C (default)
    Run,

    /// Inspect or maintain the translation cache
    Cache {
        #[command(subcommand)]
        action: CacheCmd,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCmd {
    /// Entry count and file location
    Stats,

    /// Run one eviction pass now
    Evict,

    /// Best ranked entries
    Top {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Delete every cached translation
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command.unwrap_or(Cmd::Run) {
        Cmd::Run => run(config).await,
        Cmd::Cache { action } => cache_command(&config, action),
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(db) = &args.db {
        config.cache.path = db.clone();
    }
    if let Some(period_ms) = args.period_ms {
        config.period_ms = period_ms;
    }
    if let Some(threshold) = args.short_text_threshold {
        config.speech.short_text_threshold = threshold;
    }
    if args.json {
        config.json_output = true;
    }

    config.validate().context("Invalid command line overrides")?;
    Ok(config)
}

fn open_cache(config: &Config) -> Result<Arc<TranslationCache>> {
    let cache = TranslationCache::open(&config.cache.path, config.policy())
        .with_context(|| format!("Failed to open {}", config.cache.path.display()))?;
    info!("Translation cache: {}", config.cache.path.display());
    Ok(Arc::new(cache))
}

async fn run(config: Config) -> Result<()> {
    info!("Starting Subvox Daemon v{}", env!("CARGO_PKG_VERSION"));

    let capture_cmd = Config::require(&config.capture.command, "capture.command")?;
    let recognizer_cmd = Config::require(&config.recognizer.command, "recognizer.command")?;
    let translator_cmd = Config::require(&config.translator.command, "translator.command")?;
    let speech_cmd = Config::require(&config.speech.command, "speech.command")?;

    let cache = open_cache(&config)?;

    let translator = Arc::new(
        CommandTranslator::new(translator_cmd.clone(), Duration::from_millis(config.translator.timeout_ms))
            .with_prepare(config.translator.prepare.clone())
            .with_error_prefix(config.translator.error_prefix.clone()),
    );
    if let Err(e) = translator.prepare().await {
        warn!("Translator not ready, continuing: {}", e);
    }

    let recognizer = Arc::new(CommandRecognizer::new(
        recognizer_cmd.clone(),
        Duration::from_millis(config.recognizer.timeout_ms),
    ));
    let (speech, speech_task) = speech::spawn(CommandSpeechDevice::new(speech_cmd.clone()), config.speech_config());
    let sink = Arc::new(ConsoleSink::stdout(config.json_output));

    let pipeline = Arc::new(
        Pipeline::new(
            Arc::clone(&cache),
            speech.clone(),
            recognizer,
            translator,
            sink.clone(),
            sink,
        )
        .with_region_fraction(config.region_fraction),
    );

    let source = CommandFrameSource::spawn(capture_cmd, config.capture.width, config.capture.height)
        .context("Failed to start capture")?;
    let mut capture = CaptureLoop::new(pipeline, config.period());
    capture.start(Box::new(source))?;

    info!("🛑 Press Ctrl+C to stop");

    let mut stats_ticker = interval(config.stats_interval());
    stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    stats_ticker.tick().await;
    let mut watchdog = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutting down");
                break;
            }
            _ = watchdog.tick() => {
                if !capture.is_running() {
                    error!("Capture stopped, shutting down");
                    break;
                }
            }
            _ = stats_ticker.tick() => {
                info!("Cache: {} entries, {}", cache.len(), cache.stats());
            }
        }
    }

    capture.stop().await;
    speech.shutdown();
    if let Err(e) = speech_task.await {
        error!("Speech task failed: {}", e);
    }
    cache.shutdown().context("Failed to close translation cache")?;
    info!("Final cache stats: {}", cache.stats());

    Ok(())
}

fn cache_command(config: &Config, action: CacheCmd) -> Result<()> {
    let cache = open_cache(config)?;

    match action {
        CacheCmd::Stats => {
            println!("path:        {}", config.cache.path.display());
            println!("entries:     {}", cache.len());
            println!("max_entries: {}", cache.policy().max_entries);
        }
        CacheCmd::Evict => {
            let removed = cache.evict();
            println!("evicted {} entries, {} remain", removed, cache.len());
        }
        CacheCmd::Top { count } => {
            for entry in cache.top(count) {
                println!(
                    "{:>6}  {}  {} => {}",
                    entry.access_count,
                    entry.last_accessed.format("%Y-%m-%d %H:%M:%S"),
                    entry.original_text,
                    entry.translated_text
                );
            }
        }
        CacheCmd::Clear => {
            cache.clear().context("Failed to clear translation cache")?;
            println!("cleared");
        }
    }

    Ok(())
}
