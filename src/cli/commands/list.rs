//! List command - show cached updates

use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::controller::UpdatesController;
use crate::error::BundleCacheResult;
use crate::model::Update;
use console::style;

/// Execute the list command
pub async fn execute(args: ListArgs, config: &Config) -> BundleCacheResult<()> {
    let controller = UpdatesController::open(config).await?;
    let updates = controller.catalog().all_updates().await?;
    controller.close().await;

    let threshold = config.launch.failed_launch_threshold;
    let filtered: Vec<Update> = if args.failed {
        updates
            .into_iter()
            .filter(|u| u.failed_launch_count > 0)
            .collect()
    } else {
        updates
    };

    if filtered.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => println!("No cached updates"),
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&filtered, threshold),
        OutputFormat::Json => print_json(&filtered)?,
        OutputFormat::Plain => print_plain(&filtered),
    }

    Ok(())
}

fn print_table(updates: &[Update], threshold: u32) {
    println!(
        "{:<38} {:<12} {:<10} {:<18} {:<9} {:<10}",
        style("ID").bold(),
        style("SCOPE").bold(),
        style("RUNTIME").bold(),
        style("COMMITTED").bold(),
        style("LAUNCHES").bold(),
        style("STATE").bold()
    );
    println!("{}", "-".repeat(100));

    for update in updates {
        let state = if update.is_rolled_back(threshold) {
            style("rolled back").red()
        } else if update.is_ready {
            style("ready").green()
        } else {
            style("pending").yellow()
        };
        let launches = format!(
            "{}/{}",
            update.successful_launch_count, update.failed_launch_count
        );

        println!(
            "{:<38} {:<12} {:<10} {:<18} {:<9} {:<10}",
            update.id,
            update.scope_key,
            update.runtime_version,
            update.commit_time.format("%Y-%m-%d %H:%M"),
            launches,
            state
        );
    }

    println!();
    println!("{} update(s)", updates.len());
}

fn print_json(updates: &[Update]) -> BundleCacheResult<()> {
    let json = serde_json::to_string_pretty(updates)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(updates: &[Update]) {
    for update in updates {
        println!("{}", update.id);
    }
}
