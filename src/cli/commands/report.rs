//! Report command - record a launch outcome

use crate::cli::args::ReportArgs;
use crate::config::Config;
use crate::controller::UpdatesController;
use crate::error::BundleCacheResult;
use console::style;

/// Execute the report command
pub async fn execute(args: ReportArgs, config: &Config) -> BundleCacheResult<()> {
    let controller = UpdatesController::open(config).await?;
    let result = controller
        .report_launch_outcome(args.update, args.success)
        .await;
    controller.close().await;
    result?;

    let outcome = if args.success {
        style("successful").green()
    } else {
        style("failed").red()
    };
    println!("Recorded {} launch for {}", outcome, args.update);
    Ok(())
}
