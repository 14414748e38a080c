//! CLI error types and exit codes

use hiersync_connector_ldap::DirectoryError;
use hiersync_provisioning::SyncError;
use thiserror::Error;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: Completed, but some users failed accounting
/// - 2: Configuration error
/// - 3: Directory error
/// - 4: Identity resolution error
/// - 5: Materialization error
/// - 6: Cache error
/// - 130: Interrupted
pub type CliResult<T> = Result<T, CliError>;

/// Exit code for a run stopped by SIGINT (128 + signal number).
pub const INTERRUPT_EXIT_CODE: i32 = 130;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Accounting failed for {failed} of {checked} users")]
    AccountingFailures { failed: usize, checked: usize },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::AccountingFailures { .. } => 1,
            CliError::Sync(err) => match err {
                SyncError::Configuration { .. } => 2,
                SyncError::Directory(_) => 3,
                SyncError::IdentityResolution { .. } | SyncError::IdentityLookup { .. } => 4,
                SyncError::Materialization { .. } => 5,
                SyncError::Cache { .. } | SyncError::Serialization(_) => 6,
                SyncError::Interrupted { .. } => INTERRUPT_EXIT_CODE,
            },
        }
    }

    /// Print the error to stderr with appropriate formatting
    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {}", self);
        } else {
            eprintln!("Error: {}", self);
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {}", suggestion);
            } else {
                eprintln!("\nSuggestion: {}", suggestion);
            }
        }
    }

    /// Get a suggested action for this error
    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Sync(SyncError::Directory(DirectoryError::AuthenticationFailed { .. })) => {
                Some("Check directory.bind_user and the password (HIERSYNC_BIND_PASSWORD).")
            }
            CliError::Sync(SyncError::Directory(err)) if err.is_transient() => {
                Some("Check that the directory server is reachable and try again.")
            }
            CliError::Sync(SyncError::Configuration { .. }) => {
                Some("The cache file and output root must exist before the first run.")
            }
            CliError::Sync(SyncError::IdentityResolution { .. }) => Some(
                "Every directory user needs a local account and an lg.<account> group; \
                 set sync.on_unresolved_identity: skip to leave such users out.",
            ),
            CliError::Sync(SyncError::IdentityLookup { .. }) => {
                Some("Check that the passwd/group backend (sssd, nslcd) is answering.")
            }
            CliError::Sync(SyncError::Cache { .. }) => {
                Some("Another hiersync run may hold the cache lock; check the cache directory.")
            }
            CliError::Config(_) => Some("Run 'hiersync check-config' to validate the file."),
            _ => None,
        }
    }
}

impl From<DirectoryError> for CliError {
    fn from(e: DirectoryError) -> Self {
        CliError::Sync(SyncError::Directory(e))
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(e: serde_yaml::Error) -> Self {
        CliError::Config(format!("YAML error: {}", e))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Sync(SyncError::Serialization(e))
    }
}
