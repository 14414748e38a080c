//! Materialize command - apply the cached snapshot to the output root

use clap::Args;

use super::{identity_resolver, CommandContext};
use crate::error::CliResult;

/// Arguments for the materialize command
#[derive(Args, Debug)]
#[command(about = "Create or repair group and user directories from the cache")]
pub struct MaterializeArgs {}

/// Execute the materialize command
pub async fn execute(_args: MaterializeArgs, ctx: &CommandContext) -> CliResult<()> {
    let config = ctx.load_config()?;
    let resolver = identity_resolver(&config);

    let report = ctx
        .pipeline(&config, &resolver)
        .materialize_cached()
        .await?;

    ctx.finish(&report)
}
