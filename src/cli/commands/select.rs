//! Select command - run launch selection once

use crate::cli::args::{OutputFormat, SelectArgs};
use crate::config::Config;
use crate::controller::UpdatesController;
use crate::error::BundleCacheResult;
use crate::launch::{LaunchOutcome, LaunchSelection};
use console::style;
use serde_json::json;

/// Execute the select command
pub async fn execute(args: SelectArgs, config: &Config) -> BundleCacheResult<()> {
    let scope = args
        .target
        .scope
        .unwrap_or_else(|| config.launch.scope_key.clone());
    let runtime = args
        .target
        .runtime
        .unwrap_or_else(|| config.launch.runtime_version.clone());

    let controller = UpdatesController::open(config).await?;
    let outcome = controller.select_with_report(&scope, &runtime).await;
    controller.close().await;
    let outcome = outcome?;

    match args.format {
        OutputFormat::Table => print_table(&outcome),
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Plain => println!("{}", outcome.selection.launch_asset_path().display()),
    }
    Ok(())
}

fn print_table(outcome: &LaunchOutcome) {
    match &outcome.selection {
        LaunchSelection::Cached {
            update,
            launch_asset_path,
        } => {
            println!(
                "{} cached update {}",
                style("Selected").green().bold(),
                update.id
            );
            println!("  Committed:    {}", update.commit_time.to_rfc3339());
            println!("  Launch asset: {}", launch_asset_path.display());
        }
        LaunchSelection::Embedded {
            manifest,
            launch_asset_path,
            reason,
        } => {
            println!(
                "{} embedded update {} ({})",
                style("Selected").yellow().bold(),
                manifest.id,
                reason
            );
            println!("  Launch asset: {}", launch_asset_path.display());
        }
    }

    let report = &outcome.report;
    if !report.rejected.is_empty() {
        println!();
        println!("{}", style("Rejected:").bold());
        for (id, rejection) in &report.rejected {
            println!("  {} {}", id, style(rejection.to_string()).dim());
        }
    }
    if !report.repaired.is_empty() {
        println!();
        println!(
            "Restored {} asset(s) from the embedded bundle",
            report.repaired.len()
        );
    }
}

fn print_json(outcome: &LaunchOutcome) -> BundleCacheResult<()> {
    let source = if outcome.selection.is_embedded() {
        "embedded"
    } else {
        "cached"
    };
    let value = json!({
        "source": source,
        "updateId": outcome.selection.update_id(),
        "launchAssetPath": outcome.selection.launch_asset_path(),
        "report": outcome.report,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
