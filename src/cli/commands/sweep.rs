//! Sweep command - apply the retention policy

use crate::cli::args::{OutputFormat, SweepArgs};
use crate::config::Config;
use crate::controller::UpdatesController;
use crate::error::BundleCacheResult;
use crate::retention::SweepReport;
use chrono::Duration as ChronoDuration;
use console::style;

/// Execute the sweep command
pub async fn execute(args: SweepArgs, config: &Config) -> BundleCacheResult<()> {
    let window = args
        .window_days
        .map(|days| ChronoDuration::days(i64::from(days)))
        .unwrap_or_else(|| config.retention.window());

    let controller = UpdatesController::open(config).await?;
    let report = controller.sweep_protecting(window, args.active).await;
    controller.close().await;
    let report = report?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => {
            for id in &report.deleted_updates {
                println!("{}", id);
            }
        }
        OutputFormat::Table => print_summary(&report),
    }
    Ok(())
}

fn print_summary(report: &SweepReport) {
    if report.is_empty() {
        println!("Nothing to remove");
        return;
    }

    println!("{}", style("Sweep complete").green().bold());
    println!("  Updates removed:  {}", report.deleted_updates.len());
    for id in &report.deleted_updates {
        println!("    {}", style(id).dim());
    }
    println!("  Asset rows:       {}", report.removed_asset_rows);
    println!("  Files:            {}", report.removed_files);
    if report.kept_shared_files > 0 {
        println!("  Shared files kept: {}", report.kept_shared_files);
    }
    println!("  Partial files:    {}", report.removed_partials);
    if report.errors > 0 {
        println!(
            "  {}",
            style(format!("{} file(s) could not be removed", report.errors)).yellow()
        );
    }
}
