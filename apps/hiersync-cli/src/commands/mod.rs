//! CLI command implementations

pub mod accounts;
pub mod check_config;
pub mod materialize;
pub mod snapshot;
pub mod sync;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use hiersync_connector_ldap::LdapDirectoryClient;
use hiersync_provisioning::{RunReport, SacctmgrBackend, SyncPipeline, SystemIdentityResolver};

use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// State shared by every subcommand.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config_path: PathBuf,
    /// Print the run report as JSON.
    pub json: bool,
    /// Set on Ctrl-C.
    pub interrupt: Arc<AtomicBool>,
}

impl CommandContext {
    pub fn load_config(&self) -> CliResult<AppConfig> {
        AppConfig::load(&self.config_path)
    }

    /// Pipeline wired to the system identity database.
    pub fn pipeline<'a>(
        &self,
        config: &AppConfig,
        resolver: &'a SystemIdentityResolver,
    ) -> SyncPipeline<'a> {
        SyncPipeline::new(config.sync_settings(), resolver)
            .with_interrupt(Arc::clone(&self.interrupt))
    }

    /// Print `report` and turn accounting failures into exit code 1.
    pub fn finish(&self, report: &RunReport) -> CliResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
        } else {
            for line in report.summary_lines() {
                println!("{line}");
            }
        }

        match &report.accounting {
            Some(accounting) if accounting.has_failures() => Err(CliError::AccountingFailures {
                failed: accounting.failures.len(),
                checked: accounting.checked,
            }),
            _ => Ok(()),
        }
    }
}

pub(crate) fn identity_resolver(config: &AppConfig) -> SystemIdentityResolver {
    SystemIdentityResolver::new(config.identity_timeout())
}

pub(crate) fn directory_client(config: &AppConfig) -> CliResult<LdapDirectoryClient> {
    Ok(LdapDirectoryClient::new(config.directory.clone())?)
}

pub(crate) fn accounting_backend(config: &AppConfig) -> SacctmgrBackend {
    SacctmgrBackend::new(
        config.accounting.sacctmgr_path.clone(),
        config.accounting_timeout(),
    )
}
