//! Snapshot command - query the directory and update the cache only

use clap::Args;

use super::{directory_client, identity_resolver, CommandContext};
use crate::error::CliResult;

/// Arguments for the snapshot command
#[derive(Args, Debug)]
#[command(about = "Query the directory and update the cache file")]
pub struct SnapshotArgs {}

/// Execute the snapshot command
pub async fn execute(_args: SnapshotArgs, ctx: &CommandContext) -> CliResult<()> {
    let config = ctx.load_config()?;
    let resolver = identity_resolver(&config);
    let directory = directory_client(&config)?;

    let result = ctx.pipeline(&config, &resolver).snapshot(&directory).await;
    directory.close().await;

    ctx.finish(&result?)
}
