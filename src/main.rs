//! Download cache CLI application
//!
//! Command-line interface for inspecting and maintaining the disk cache of
//! streamed downloads.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use download_cache::cli::{cache_config, handle_command, open_index, Cli};
use download_cache::config::AppConfig;
use download_cache::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Environment may carry RUST_LOG
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    let config = AppConfig::load(cli.global.config.clone()).await?;

    init_logging(&cli, &config);
    info!("Download cache v{} starting", env!("CARGO_PKG_VERSION"));

    let index = open_index(cache_config(&cli.global, &config)).await?;
    handle_command(cli.command, &index).await
}

/// Initialize logging from verbosity flags, falling back to the configured level
fn init_logging(cli: &Cli, config: &AppConfig) {
    let level = cli
        .log_level()
        .map(|level| level.to_string().to_lowercase())
        .unwrap_or_else(|| config.logging.level.clone());

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("download_cache={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
