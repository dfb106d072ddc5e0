//! Bossfeed - replays decoded game messages and uploads boss HP telemetry.
//!
//! ## Configuration
//!
//! - `BOSSFEED_CONFIG`: config file path (default: `config/bossfeed.toml`)
//! - `BPTIMER_BASE_URL`, `BPTIMER_API_KEY`, `RETRY_MAX`, `RETRY_BACKOFF_SECONDS`,
//!   `DRY_RUN`, `BATCH_SIZE`, `EXTRA_HEADERS`, `METRICS_PATH`, `LOG_LEVEL`:
//!   override the matching config values
//! - `MOCK_BPTIMER_URL`: mock endpoint used with `--target mock`
//!   (default: `http://127.0.0.1:8000`)
//! - `RUST_LOG`: logging filter (default: the configured `log_level`)

use bossfeed::config::BossfeedConfig;
use bossfeed::pipeline::Relay;
use bossfeed::publisher::Publisher;
use bossfeed::shutdown::ShutdownSignal;
use bossfeed::source::ReplaySource;
use bossfeed::tracker::EncounterTracker;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Default mock endpoint for `--target mock`
const DEFAULT_MOCK_URL: &str = "http://127.0.0.1:8000";

const CONSENT_NOTICE: &str =
    "This tool sends boss HP telemetry to BP Timer. Ensure you have consent to upload combat data.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    /// Local mock ingestion API
    Mock,
    /// Configured BP Timer API
    Bptimer,
}

#[derive(Debug, Parser)]
#[command(name = "bossfeed", version, about = "Standalone BP Timer uploader")]
struct Args {
    /// JSONL capture of decoded messages to replay
    #[arg(long)]
    input: PathBuf,

    /// Where to send reports
    #[arg(long, value_enum, default_value_t = Target::Mock)]
    target: Target,

    /// Log payloads instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Config file (overrides BOSSFEED_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<BossfeedConfig, bossfeed::config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => BossfeedConfig::load_from(path)?,
        None => BossfeedConfig::load()?,
    };

    if args.dry_run {
        config.publisher.dry_run = true;
    }
    if args.target == Target::Mock {
        config.publisher.base_url =
            std::env::var("MOCK_BPTIMER_URL").unwrap_or_else(|_| DEFAULT_MOCK_URL.to_string());
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.runtime.log_level);

    println!("{}", CONSENT_NOTICE);

    info!(
        mode = ?args.target,
        base_url = %config.publisher.base_url,
        dry_run = config.publisher.dry_run,
        input = %args.input.display(),
        "Bossfeed starting"
    );

    let tracker = match EncounterTracker::from_mapping_file(&config.tracker.boss_mapping) {
        Ok(tracker) => tracker.with_tick_threshold(config.tracker.tick_threshold),
        Err(e) => {
            error!(error = %e, "Failed to load boss mapping");
            return ExitCode::FAILURE;
        }
    };

    let mut source = match ReplaySource::open(&args.input).await {
        Ok(source) => source,
        Err(e) => {
            error!(error = %e, "Failed to open input");
            return ExitCode::FAILURE;
        }
    };

    let publisher = Publisher::new(config.publisher.clone());
    let mut relay = Relay::new(tracker, publisher);

    let shutdown = ShutdownSignal::new();
    let listener = shutdown.clone();
    tokio::spawn(async move { listener.wait().await });

    let outcome = relay.run(&mut source, &shutdown).await;
    let metrics = relay.close();

    let mut exit = ExitCode::SUCCESS;
    if let Err(e) = &outcome {
        error!(error = %e, "Replay aborted");
        exit = ExitCode::FAILURE;
    }

    if let Err(e) = metrics.write_to(&config.runtime.metrics_path) {
        warn!(
            path = %config.runtime.metrics_path.display(),
            error = %e,
            "Failed to write metrics"
        );
        exit = ExitCode::FAILURE;
    }

    info!("Bossfeed shutdown complete");
    exit
}
