//! Reset command - make a rolled-back update launchable again

use crate::cli::args::ResetArgs;
use crate::config::Config;
use crate::controller::UpdatesController;
use crate::error::BundleCacheResult;

/// Execute the reset command
pub async fn execute(args: ResetArgs, config: &Config) -> BundleCacheResult<()> {
    let controller = UpdatesController::open(config).await?;
    let result = controller.reset_launch_failures(args.update).await;
    controller.close().await;
    result?;

    println!("Cleared failed launches for {}", args.update);
    Ok(())
}
