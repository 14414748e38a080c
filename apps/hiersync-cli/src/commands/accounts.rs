//! Accounts command - reconcile Slurm default accounts from the cache

use clap::Args;

use super::{accounting_backend, identity_resolver, CommandContext};
use crate::error::{CliError, CliResult};

/// Arguments for the accounts command
#[derive(Args, Debug)]
#[command(about = "Create missing Slurm default accounts from the cache")]
pub struct AccountsArgs {
    /// Cluster name, overriding accounting.cluster
    #[arg(long)]
    pub cluster: Option<String>,
}

/// Execute the accounts command
pub async fn execute(args: AccountsArgs, ctx: &CommandContext) -> CliResult<()> {
    let mut config = ctx.load_config()?;
    if let Some(cluster) = args.cluster {
        config.accounting.cluster = cluster;
    }
    if config.accounting.cluster.trim().is_empty() {
        return Err(CliError::Config(
            "no cluster given: set accounting.cluster or pass --cluster".to_string(),
        ));
    }

    let resolver = identity_resolver(&config);
    let backend = accounting_backend(&config);

    let report = ctx
        .pipeline(&config, &resolver)
        .accounts_cached(&backend)
        .await?;

    ctx.finish(&report)
}
