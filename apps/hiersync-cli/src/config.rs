//! Configuration file for the hiersync CLI
//!
//! One YAML document with `directory`, `sync` and `accounting` sections.
//! JSON is accepted as well, being a YAML subset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hiersync_connector_ldap::DirectoryConfig;
use hiersync_provisioning::{SyncSettings, UnresolvedIdentityPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "HIERSYNC_CONFIG";

/// Environment variable overriding `directory.bind_password`.
pub const PASSWORD_ENV: &str = "HIERSYNC_BIND_PASSWORD";

/// Config file used when neither `--config` nor `HIERSYNC_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hiersync/config.yaml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub directory: DirectoryConfig,
    pub sync: SyncSection,
    #[serde(default)]
    pub accounting: AccountingSection,
}

/// Snapshot, cache and hierarchy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    /// LDAP filter selecting the member groups of the root group.
    pub root_group_query: String,
    /// Root label written into the snapshot.
    pub root_group_label: String,
    pub cache_file: PathBuf,
    pub output_root: PathBuf,
    #[serde(default)]
    pub include_user_subdir: bool,
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    #[serde(default)]
    pub on_unresolved_identity: UnresolvedIdentityPolicy,
    #[serde(default = "default_identity_timeout")]
    pub identity_timeout_secs: u64,
}

/// Slurm accounting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cluster: String,
    #[serde(default = "default_sacctmgr_path")]
    pub sacctmgr_path: PathBuf,
    #[serde(default = "default_accounting_timeout")]
    pub timeout_secs: u64,
}

fn default_admin_user() -> String {
    "root".to_string()
}

fn default_identity_timeout() -> u64 {
    10
}

fn default_sacctmgr_path() -> PathBuf {
    PathBuf::from("sacctmgr")
}

fn default_accounting_timeout() -> u64 {
    30
}

impl Default for AccountingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            cluster: String::new(),
            sacctmgr_path: default_sacctmgr_path(),
            timeout_secs: default_accounting_timeout(),
        }
    }
}

impl AppConfig {
    /// Read, parse and validate the config file, applying environment
    /// overrides.
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_yaml(&text)?;
        config.apply_password_override(std::env::var(PASSWORD_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating.
    pub fn from_yaml(text: &str) -> CliResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Replace the bind password when `password` is set and non-empty.
    pub fn apply_password_override(&mut self, password: Option<String>) {
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            self.directory.bind_password = Some(password);
        }
    }

    pub fn validate(&self) -> CliResult<()> {
        self.directory
            .validate()
            .map_err(|e| CliError::Config(format!("directory: {}", e)))?;

        if self
            .directory
            .bind_password
            .as_deref()
            .map_or(true, str::is_empty)
        {
            return Err(CliError::Config(format!(
                "directory: bind_password is required (or set {PASSWORD_ENV})"
            )));
        }

        let sync = &self.sync;
        let required = [
            ("sync.root_group_query", sync.root_group_query.trim().is_empty()),
            ("sync.root_group_label", sync.root_group_label.trim().is_empty()),
            ("sync.cache_file", sync.cache_file.as_os_str().is_empty()),
            ("sync.output_root", sync.output_root.as_os_str().is_empty()),
            ("sync.admin_user", sync.admin_user.trim().is_empty()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, missing)| *missing) {
            return Err(CliError::Config(format!("{field} is required")));
        }
        if sync.identity_timeout_secs == 0 {
            return Err(CliError::Config(
                "sync.identity_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let accounting = &self.accounting;
        if accounting.enabled {
            if accounting.cluster.trim().is_empty() {
                return Err(CliError::Config(
                    "accounting.cluster is required when accounting is enabled".to_string(),
                ));
            }
            if accounting.sacctmgr_path.as_os_str().is_empty() {
                return Err(CliError::Config(
                    "accounting.sacctmgr_path must not be empty".to_string(),
                ));
            }
            if accounting.timeout_secs == 0 {
                return Err(CliError::Config(
                    "accounting.timeout_secs must be greater than zero".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.directory = self.directory.redacted();
        config
    }

    /// Pipeline settings derived from the `sync` and `accounting` sections.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings::new(
            &self.sync.root_group_query,
            &self.sync.root_group_label,
            &self.sync.cache_file,
            &self.sync.output_root,
        )
        .with_user_subdir(self.sync.include_user_subdir)
        .with_admin_user(&self.sync.admin_user)
        .with_policy(self.sync.on_unresolved_identity)
        .with_cluster(&self.accounting.cluster)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.identity_timeout_secs)
    }

    pub fn accounting_timeout(&self) -> Duration {
        Duration::from_secs(self.accounting.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
directory:
  serverAddress: ad.example.org
  bindUser: "CN=svc-sync,OU=Service,DC=example,DC=org"
  bindPassword: from-file
  searchBase: "DC=example,DC=org"
sync:
  root_group_query: "(&(objectClass=group)(memberOf=CN=hpc.users,OU=Groups,DC=example,DC=org))"
  root_group_label: hpc.users
  cache_file: /var/lib/hiersync/groups.json
  output_root: /data/groups
  include_user_subdir: true
accounting:
  enabled: true
  cluster: hpc
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.directory.port, 389);
        assert_eq!(config.sync.admin_user, "root");
        assert_eq!(
            config.sync.on_unresolved_identity,
            UnresolvedIdentityPolicy::Abort
        );
        assert_eq!(config.identity_timeout(), Duration::from_secs(10));
        assert_eq!(config.accounting.sacctmgr_path, PathBuf::from("sacctmgr"));
        assert_eq!(config.accounting_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_password_override() {
        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();

        config.apply_password_override(Some(String::new()));
        assert_eq!(config.directory.bind_password.as_deref(), Some("from-file"));

        config.apply_password_override(Some("from-env".to_string()));
        assert_eq!(config.directory.bind_password.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_missing_password_is_rejected() {
        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.directory.bind_password = None;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(PASSWORD_ENV));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_accounting_requires_cluster_only_when_enabled() {
        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.accounting.cluster.clear();
        assert!(config.validate().is_err());

        config.accounting.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_sync_field_is_named() {
        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.sync.root_group_label = "  ".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sync.root_group_label"));
    }

    #[test]
    fn test_redacted_hides_password() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        let shown = serde_yaml::to_string(&config.redacted()).unwrap();

        assert!(!shown.contains("from-file"));
        assert!(!format!("{:?}", config).contains("from-file"));
    }

    #[test]
    fn test_sync_settings_carry_policy_and_cluster() {
        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.sync.on_unresolved_identity = UnresolvedIdentityPolicy::Skip;

        let settings = config.sync_settings();
        assert_eq!(settings.cluster, "hpc");
        assert!(settings.include_user_subdir);
        assert_eq!(settings.on_unresolved_identity, UnresolvedIdentityPolicy::Skip);
        assert_eq!(settings.cache_file, PathBuf::from("/var/lib/hiersync/groups.json"));
    }

    #[test]
    fn test_unknown_policy_is_a_parse_error() {
        let text = SAMPLE.replace(
            "include_user_subdir: true",
            "include_user_subdir: true\n  on_unresolved_identity: ignore",
        );
        assert!(AppConfig::from_yaml(&text).is_err());
    }
}
