//! Status command - cache location, counts and embedded update health

use crate::config::Config;
use crate::controller::UpdatesController;
use crate::error::BundleCacheResult;
use console::{style, Emoji};

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "[FAIL] ");
static WARN: Emoji<'_, '_> = Emoji("⚠ ", "[WARN] ");

/// How many crashed updates to list
const RECENT_FAILURES: u32 = 5;

/// Execute the status command
pub async fn execute(config: &Config) -> BundleCacheResult<()> {
    println!("{}", style("bundlecache Status").bold().cyan());
    println!();

    let controller = UpdatesController::open(config).await?;

    println!("{}", style("Storage:").bold());
    println!("  Root:     {}", config.storage.root_dir().display());
    println!("  Catalog:  {}", config.storage.database_path().display());
    println!("  Assets:   {}", controller.store().root().display());

    let counts = controller.counts().await?;
    println!();
    println!("{}", style("Catalog:").bold());
    println!(
        "  {} {} update(s), {} ready",
        CHECK, counts.updates, counts.ready_updates
    );
    println!("  {} {} asset(s)", CHECK, counts.assets);

    let failed = controller
        .catalog()
        .recent_failed_launches(RECENT_FAILURES)
        .await?;
    if !failed.is_empty() {
        println!(
            "  {} {} with failed launches:",
            WARN,
            style(format!("{} update(s)", failed.len())).yellow()
        );
        for id in failed {
            println!("      {}", id);
        }
    }

    println!();
    println!("{}", style("Embedded update:").bold());
    let embedded_ok = match controller.embedded().launch_asset_path().await {
        Ok(path) => {
            if let Ok(manifest) = controller.embedded().manifest().await {
                println!(
                    "  {} {} (runtime {})",
                    CHECK, manifest.id, manifest.runtime_version
                );
            }
            println!("      {}", path.display());
            true
        }
        Err(e) => {
            println!("  {} {}", CROSS, style(e.to_string()).red());
            println!(
                "      Expected a manifest in {}",
                controller.embedded().dir().display()
            );
            false
        }
    };

    println!();
    if embedded_ok {
        println!("{}", style("All critical checks passed").green().bold());
    } else {
        println!(
            "{}",
            style("Embedded update unusable - launches will fail when no cached update qualifies")
                .yellow()
                .bold()
        );
    }

    controller.close().await;
    Ok(())
}
