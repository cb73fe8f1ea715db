//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

/// bundlecache - launch selection and asset cache for over-the-air updates
///
/// Inspects and maintains the update catalog a host application boots from.
#[derive(Parser, Debug)]
#[command(name = "bundlecache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BUNDLECACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show cache location, counts and the embedded update
    Status,

    /// List cached updates
    List(ListArgs),

    /// Run launch selection and print the chosen update
    Select(SelectArgs),

    /// Record the outcome of a launch
    Report(ReportArgs),

    /// Clear the failed launch counter of an update
    Reset(ResetArgs),

    /// Remove stale updates, orphaned assets and partial files
    Sweep(SweepArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only show updates with failed launches
    #[arg(long)]
    pub failed: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Scope and runtime, defaulting to the `[launch]` config section
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Scope key (default: from config)
    #[arg(long)]
    pub scope: Option<String>,

    /// Runtime version (default: from config)
    #[arg(long)]
    pub runtime: Option<String>,
}

/// Arguments for the select command
#[derive(Parser, Debug)]
pub struct SelectArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the report command
#[derive(Parser, Debug)]
#[command(group(clap::ArgGroup::new("outcome").required(true).args(["success", "failure"])))]
pub struct ReportArgs {
    /// Update ID
    pub update: Uuid,

    /// The launch succeeded
    #[arg(long)]
    pub success: bool,

    /// The launch crashed
    #[arg(long)]
    pub failure: bool,
}

/// Arguments for the reset command
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Update ID
    pub update: Uuid,
}

/// Arguments for the sweep command
#[derive(Parser, Debug)]
pub struct SweepArgs {
    /// Remove updates not launched for N days (default: from config)
    #[arg(long)]
    pub window_days: Option<u32>,

    /// Update currently running, never removed
    #[arg(long)]
    pub active: Option<Uuid>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
