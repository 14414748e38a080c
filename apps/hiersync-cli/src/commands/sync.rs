//! Sync command - full run: directory, cache, hierarchy, accounting

use clap::Args;
use hiersync_provisioning::AccountingBackend;
use tracing::info;

use super::{accounting_backend, directory_client, identity_resolver, CommandContext};
use crate::error::CliResult;

/// Arguments for the sync command
#[derive(Args, Debug)]
#[command(about = "Query the directory, update the cache and apply it")]
pub struct SyncArgs {
    /// Do not reconcile Slurm accounts
    #[arg(long)]
    pub skip_accounting: bool,

    /// Do not create or repair directories
    #[arg(long)]
    pub skip_materialize: bool,
}

/// Execute the sync command
pub async fn execute(args: SyncArgs, ctx: &CommandContext) -> CliResult<()> {
    let config = ctx.load_config()?;
    let resolver = identity_resolver(&config);
    let directory = directory_client(&config)?;

    let backend = if args.skip_accounting {
        None
    } else if config.accounting.enabled {
        Some(accounting_backend(&config))
    } else {
        info!("Accounting disabled in configuration");
        None
    };

    let result = ctx
        .pipeline(&config, &resolver)
        .run(
            &directory,
            backend.as_ref().map(|b| b as &dyn AccountingBackend),
            !args.skip_materialize,
        )
        .await;
    directory.close().await;

    ctx.finish(&result?)
}
