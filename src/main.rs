//! bundlecache - update cache maintenance CLI
//!
//! CLI entry point that dispatches to subcommands.

use bundlecache::cli::{commands, Cli, Commands};
use bundlecache::config::ConfigManager;
use bundlecache::error::BundleCacheResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> BundleCacheResult<()> {
    let cli = Cli::parse();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, config.general.verbose, &config.general.log_format);

    match cli.command {
        Commands::Status => commands::status(&config).await,
        Commands::List(args) => commands::list(args, &config).await,
        Commands::Select(args) => commands::select(args, &config).await,
        Commands::Report(args) => commands::report(args, &config).await,
        Commands::Reset(args) => commands::reset(args, &config).await,
        Commands::Sweep(args) => commands::sweep(args, &config).await,
        Commands::Config(args) => commands::config(args, &config_manager, &config).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set
fn init_logging(verbosity: u8, config_verbose: bool, format: &str) {
    let level = match verbosity {
        0 if config_verbose => "info",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bundlecache={level}")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
