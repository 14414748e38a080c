//! hiersync - directory membership sync
//!
//! Mirrors the member groups of a directory root group into:
//! - a cached JSON snapshot, archived on every change
//! - one directory per group and per member with fixed owner and mode
//! - Slurm default accounts for every member

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hiersync_cli::commands::{self, CommandContext};
use hiersync_cli::config::{CONFIG_ENV, DEFAULT_CONFIG_PATH};
use hiersync_cli::error::{CliResult, INTERRUPT_EXIT_CODE};
use hiersync_cli::logging;
use hiersync_cli::signal::{self, InterruptAction};
use tracing::warn;

/// hiersync - directory membership sync
#[derive(Parser)]
#[command(name = "hiersync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full run: directory, cache, hierarchy, accounting
    Sync(commands::sync::SyncArgs),

    /// Query the directory and update the cache only
    Snapshot(commands::snapshot::SnapshotArgs),

    /// Apply the cached snapshot to the output root
    Materialize(commands::materialize::MaterializeArgs),

    /// Reconcile Slurm default accounts from the cache
    Accounts(commands::accounts::AccountsArgs),

    /// Validate the configuration file
    CheckConfig(commands::check_config::CheckConfigArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let interrupt = Arc::new(AtomicBool::new(false));
    spawn_interrupt_handler(Arc::clone(&interrupt));

    let ctx = CommandContext {
        config_path: cli.config,
        json: cli.json,
        interrupt,
    };

    match run(cli.command, &ctx).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(command: Commands, ctx: &CommandContext) -> CliResult<()> {
    match command {
        Commands::Sync(args) => commands::sync::execute(args, ctx).await,
        Commands::Snapshot(args) => commands::snapshot::execute(args, ctx).await,
        Commands::Materialize(args) => commands::materialize::execute(args, ctx).await,
        Commands::Accounts(args) => commands::accounts::execute(args, ctx).await,
        Commands::CheckConfig(args) => commands::check_config::execute(args, ctx).await,
    }
}

/// First Ctrl-C asks the run to stop at the next group boundary; a second
/// one exits immediately.
fn spawn_interrupt_handler(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match signal::record_interrupt(&flag) {
                InterruptAction::Graceful => {
                    warn!("Interrupt received, stopping after the current group");
                }
                InterruptAction::Exit => {
                    warn!("Second interrupt received, exiting");
                    std::process::exit(INTERRUPT_EXIT_CODE);
                }
            }
        }
    });
}
