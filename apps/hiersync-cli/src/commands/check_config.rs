//! Check-config command - validate the configuration file

use clap::Args;
use hiersync_provisioning::{SnapshotCache, SyncError};
use tracing::info;

use super::{directory_client, CommandContext};
use crate::config::AppConfig;
use crate::error::CliResult;

/// Arguments for the check-config command
#[derive(Args, Debug)]
#[command(about = "Validate the configuration and print it with secrets redacted")]
pub struct CheckConfigArgs {
    /// Also bind to the directory server
    #[arg(long)]
    pub connect: bool,
}

/// Execute the check-config command
pub async fn execute(args: CheckConfigArgs, ctx: &CommandContext) -> CliResult<()> {
    let config = ctx.load_config()?;
    check_paths(&config)?;

    if args.connect {
        let directory = directory_client(&config)?;
        let result = directory.test_connection().await;
        directory.close().await;
        result?;
        info!(url = %directory.config().url(), "Directory bind succeeded");
    }

    let shown = config.redacted();
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
    } else {
        print!("{}", serde_yaml::to_string(&shown)?);
    }
    Ok(())
}

/// The cache file and output root must be set up before the first run.
pub fn check_paths(config: &AppConfig) -> CliResult<()> {
    SnapshotCache::new(&config.sync.cache_file).ensure_regular_file()?;

    if !config.sync.output_root.is_dir() {
        return Err(SyncError::configuration(format!(
            "output root {} is not a directory",
            config.sync.output_root.display()
        ))
        .into());
    }
    Ok(())
}
