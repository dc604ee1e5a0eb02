//! CLI entry point for Organizerr
//!
//! Loads configuration, opens the state store and runs the scheduler and API server.

use clap::Parser;
use organizerr::{run_server, start_scheduler, Config, Organizer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Organizerr - symlink mirror and codec normalizer for a video archive
#[derive(Parser, Debug)]
#[command(name = "organizerr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional TOML config file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one full pass at startup instead of waiting for the first interval
    #[arg(long, default_value = "false")]
    scan_on_start: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    let config = match Config::load_or_env(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!("Organizerr starting");
    log::info!("  Catalog: {}", config.catalog.url);
    log::info!("  Source: {}", config.paths.source_root.display());
    log::info!("  Target: {}", config.paths.target_root.display());
    log::info!("  Host source root: {}", config.paths.host_source_root.display());
    log::info!("  Scan interval: {} min", config.scan.interval_minutes);
    if config.catalog.token.is_empty() {
        log::warn!("API_TOKEN is not set; catalog requests will likely be rejected");
    }

    let bind = config.server.bind.clone();
    let organizer = match Organizer::new(config).await {
        Ok(organizer) => Arc::new(organizer),
        Err(e) => {
            log::error!("Failed to initialize: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.scan_on_start {
        organizer.trigger_scan();
    }
    let _scheduler = start_scheduler(organizer.clone());

    if let Err(e) = run_server(organizer, &bind).await {
        log::error!("API server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
