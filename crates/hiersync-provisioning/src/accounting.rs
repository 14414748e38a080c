//! Scheduler accounting reconciliation.
//!
//! Every user found in a snapshot must have a default account in the Slurm
//! accounting database. Users that already have one are left alone; the
//! others are created with their group as default account.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::{SyncError, SyncResult};
use crate::snapshot::MembershipSnapshot;

/// Per-user accounting failure. Never aborts a batch.
#[derive(Debug, Error)]
pub enum AccountingError {
    /// Value unsafe to pass on the command line.
    #[error("Invalid {field} '{value}': {reason}")]
    InvalidArgument {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The accounting tool could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The accounting tool did not finish in time and was killed.
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    /// The accounting tool exited unsuccessfully.
    #[error("{operation} failed ({status}): {stderr}")]
    CommandFailed {
        operation: &'static str,
        status: String,
        stderr: String,
    },
}

impl AccountingError {
    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            AccountingError::InvalidArgument { .. } => "ACCOUNTING_INVALID_ARGUMENT",
            AccountingError::Spawn { .. } => "ACCOUNTING_SPAWN_FAILED",
            AccountingError::Timeout { .. } => "ACCOUNTING_TIMEOUT",
            AccountingError::CommandFailed { .. } => "ACCOUNTING_COMMAND_FAILED",
        }
    }
}

pub type AccountingResult<T> = Result<T, AccountingError>;

/// Access to the accounting database.
#[async_trait]
pub trait AccountingBackend: Send + Sync {
    /// The user's default account, `None` when the user has no record.
    async fn show_default_account(&self, user: &str) -> AccountingResult<Option<String>>;

    /// Create `user` on `cluster` with `account` as default account.
    async fn create_user(&self, user: &str, cluster: &str, account: &str)
        -> AccountingResult<()>;
}

/// Check that `value` is a single, option-free command line token.
pub fn validate_argument(field: &'static str, value: &str) -> AccountingResult<()> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value.chars().any(char::is_whitespace) {
        Some("must not contain whitespace")
    } else if value.starts_with('-') {
        Some("must not start with '-'")
    } else if value.contains('=') {
        Some("must not contain '='")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(AccountingError::InvalidArgument {
            field,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// `sacctmgr` arguments listing a user's default account.
pub fn show_args(user: &str) -> Vec<String> {
    vec![
        "--noheader".to_string(),
        "--parsable2".to_string(),
        "show".to_string(),
        "user".to_string(),
        user.to_string(),
        "format=DefaultAccount".to_string(),
    ]
}

/// `sacctmgr` arguments creating a user with a default account.
pub fn create_args(user: &str, cluster: &str, account: &str) -> Vec<String> {
    vec![
        "--immediate".to_string(),
        "add".to_string(),
        "user".to_string(),
        user.to_string(),
        format!("cluster={cluster}"),
        format!("account={account}"),
        format!("defaultaccount={account}"),
    ]
}

/// First non-blank line of `show` output. Empty output means no record.
pub fn parse_default_account(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(|line| line.trim().trim_end_matches('|').trim())
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Backend running the `sacctmgr` command line tool.
#[derive(Debug, Clone)]
pub struct SacctmgrBackend {
    program: PathBuf,
    timeout: Duration,
}

impl SacctmgrBackend {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, operation: &'static str, args: &[String]) -> AccountingResult<String> {
        debug!(program = %self.program.display(), ?args, "Running accounting command");

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AccountingError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        // On timeout the future owning the child is dropped, which kills it.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                return Err(AccountingError::Timeout {
                    operation,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(source)) => {
                return Err(AccountingError::Spawn {
                    program: self.program.display().to_string(),
                    source,
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(AccountingError::CommandFailed {
                operation,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for SacctmgrBackend {
    fn default() -> Self {
        Self::new("sacctmgr", Duration::from_secs(30))
    }
}

#[async_trait]
impl AccountingBackend for SacctmgrBackend {
    async fn show_default_account(&self, user: &str) -> AccountingResult<Option<String>> {
        let stdout = self.run("show user", &show_args(user)).await?;
        Ok(parse_default_account(&stdout))
    }

    async fn create_user(
        &self,
        user: &str,
        cluster: &str,
        account: &str,
    ) -> AccountingResult<()> {
        self.run("add user", &create_args(user, cluster, account))
            .await
            .map(|_| ())
    }
}

/// A default account created during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountAssignment {
    pub user: String,
    pub account: String,
}

/// A user whose accounting record could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountingFailure {
    pub user: String,
    pub account: String,
    pub code: String,
    pub message: String,
}

/// Outcome of [`AccountingReconciler::reconcile_snapshot`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountingReport {
    pub cluster: String,
    /// Distinct users checked.
    pub checked: usize,
    /// Users that already had a default account.
    pub existing: usize,
    pub created: Vec<AccountAssignment>,
    pub failures: Vec<AccountingFailure>,
}

impl AccountingReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Ensures default accounting records exist.
pub struct AccountingReconciler<'a, B: ?Sized> {
    backend: &'a B,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a, B> AccountingReconciler<'a, B>
where
    B: AccountingBackend + ?Sized,
{
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            interrupt: None,
        }
    }

    /// Flag checked between users.
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Create `user` with `account` as default on `cluster` unless the user
    /// already has any default account.
    ///
    /// Returns the assigned account, or `None` when nothing was done.
    pub async fn ensure_default_account(
        &self,
        user: &str,
        account: &str,
        cluster: &str,
    ) -> AccountingResult<Option<String>> {
        validate_argument("user", user)?;
        validate_argument("account", account)?;
        validate_argument("cluster", cluster)?;

        if let Some(existing) = self.backend.show_default_account(user).await? {
            debug!(user = %user, default_account = %existing, "Default account present");
            return Ok(None);
        }

        self.backend.create_user(user, cluster, account).await?;
        info!(user = %user, account = %account, cluster = %cluster, "Created default account");
        Ok(Some(account.to_string()))
    }

    /// Reconcile every user of `snapshot`. A user's account is its first
    /// group in snapshot order; each user is handled once. Per-user errors
    /// are collected, only an interrupt stops the batch.
    #[instrument(skip(self, snapshot))]
    pub async fn reconcile_snapshot(
        &self,
        snapshot: &MembershipSnapshot,
        cluster: &str,
    ) -> SyncResult<AccountingReport> {
        let mut report = AccountingReport {
            cluster: cluster.to_string(),
            ..AccountingReport::default()
        };
        let mut seen = HashSet::new();

        for (group, user) in snapshot.memberships() {
            if !seen.insert(user.name.as_str()) {
                continue;
            }
            if self
                .interrupt
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
            {
                return Err(SyncError::Interrupted {
                    stage: format!("accounting for user {}", user.name),
                });
            }

            report.checked += 1;
            match self
                .ensure_default_account(&user.name, &group.name, cluster)
                .await
            {
                Ok(Some(account)) => report.created.push(AccountAssignment {
                    user: user.name.clone(),
                    account,
                }),
                Ok(None) => report.existing += 1,
                Err(err) => {
                    warn!(
                        user = %user.name,
                        account = %group.name,
                        code = err.error_code(),
                        error = %err,
                        "Accounting reconciliation failed"
                    );
                    report.failures.push(AccountingFailure {
                        user: user.name.clone(),
                        account: group.name.clone(),
                        code: err.error_code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            checked = report.checked,
            created = report.created.len(),
            existing = report.existing,
            failed = report.failures.len(),
            "Accounting reconciled"
        );

        Ok(report)
    }
}

/// In-memory accounting database for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAccountingBackend {
    defaults: Mutex<HashMap<String, String>>,
    creates: AtomicUsize,
    failing: HashSet<String>,
}

impl MemoryAccountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing default account.
    #[must_use]
    pub fn with_default(self, user: &str, account: &str) -> Self {
        if let Ok(mut defaults) = self.defaults.lock() {
            defaults.insert(user.to_string(), account.to_string());
        }
        self
    }

    /// Make every call for `user` fail.
    #[must_use]
    pub fn with_failure(mut self, user: &str) -> Self {
        self.failing.insert(user.to_string());
        self
    }

    /// Number of successful `create_user` calls.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn default_account(&self, user: &str) -> Option<String> {
        self.defaults
            .lock()
            .ok()
            .and_then(|defaults| defaults.get(user).cloned())
    }

    fn check(&self, operation: &'static str, user: &str) -> AccountingResult<()> {
        if self.failing.contains(user) {
            return Err(AccountingError::CommandFailed {
                operation,
                status: "exit status: 1".to_string(),
                stderr: "database unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AccountingBackend for MemoryAccountingBackend {
    async fn show_default_account(&self, user: &str) -> AccountingResult<Option<String>> {
        self.check("show user", user)?;
        Ok(self.default_account(user))
    }

    async fn create_user(
        &self,
        user: &str,
        _cluster: &str,
        account: &str,
    ) -> AccountingResult<()> {
        self.check("add user", user)?;
        if let Ok(mut defaults) = self.defaults.lock() {
            defaults.insert(user.to_string(), account.to_string());
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{GroupEntry, UserEntry};

    #[test]
    fn test_command_lines() {
        assert_eq!(
            show_args("alice"),
            [
                "--noheader",
                "--parsable2",
                "show",
                "user",
                "alice",
                "format=DefaultAccount"
            ]
        );
        assert_eq!(
            create_args("alice", "hpc", "teamA"),
            [
                "--immediate",
                "add",
                "user",
                "alice",
                "cluster=hpc",
                "account=teamA",
                "defaultaccount=teamA"
            ]
        );
    }

    #[test]
    fn test_parse_default_account() {
        assert_eq!(parse_default_account(""), None);
        assert_eq!(parse_default_account("\n  \n"), None);
        assert_eq!(parse_default_account("teamA\n"), Some("teamA".to_string()));
        assert_eq!(parse_default_account("teamA|\n"), Some("teamA".to_string()));
    }

    #[test]
    fn test_validate_argument() {
        assert!(validate_argument("user", "alice").is_ok());
        assert!(validate_argument("account", "lg.alice").is_ok());

        for bad in ["", "a b", "-x", "--immediate", "account=root", "a\tb"] {
            let err = validate_argument("user", bad).unwrap_err();
            assert_eq!(err.error_code(), "ACCOUNTING_INVALID_ARGUMENT");
        }
    }

    #[tokio::test]
    async fn test_ensure_default_account_is_idempotent() {
        let backend = MemoryAccountingBackend::new();
        let reconciler = AccountingReconciler::new(&backend);

        let first = reconciler
            .ensure_default_account("alice", "teamA", "hpc")
            .await
            .unwrap();
        let second = reconciler
            .ensure_default_account("alice", "teamA", "hpc")
            .await
            .unwrap();

        assert_eq!(first, Some("teamA".to_string()));
        assert_eq!(second, None);
        assert_eq!(backend.create_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_default_is_kept() {
        let backend = MemoryAccountingBackend::new().with_default("alice", "other");
        let reconciler = AccountingReconciler::new(&backend);

        let assigned = reconciler
            .ensure_default_account("alice", "teamA", "hpc")
            .await
            .unwrap();

        assert_eq!(assigned, None);
        assert_eq!(backend.default_account("alice"), Some("other".to_string()));
        assert_eq!(backend.create_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_argument_never_reaches_backend() {
        let backend = MemoryAccountingBackend::new();
        let reconciler = AccountingReconciler::new(&backend);

        let err = reconciler
            .ensure_default_account("alice", "teamA", "-hpc")
            .await
            .unwrap_err();

        assert!(matches!(err, AccountingError::InvalidArgument { field: "cluster", .. }));
        assert_eq!(backend.create_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_snapshot_uses_first_group_and_isolates_failures() {
        let snapshot = MembershipSnapshot::new("hpc.users")
            .with_group(
                GroupEntry::new("teamA")
                    .with_member(UserEntry::new("alice", 1001, 2001))
                    .with_member(UserEntry::new("bob", 1002, 2002)),
            )
            .with_group(
                GroupEntry::new("teamB")
                    .with_member(UserEntry::new("alice", 1001, 2001))
                    .with_member(UserEntry::new("carol", 1003, 2003))
                    .with_member(UserEntry::new("dave", 1004, 2004)),
            );
        let backend = MemoryAccountingBackend::new()
            .with_default("carol", "legacy")
            .with_failure("bob");

        let report = AccountingReconciler::new(&backend)
            .reconcile_snapshot(&snapshot, "hpc")
            .await
            .unwrap();

        assert_eq!(report.checked, 4);
        assert_eq!(report.existing, 1);
        assert_eq!(
            report.created,
            vec![
                AccountAssignment {
                    user: "alice".to_string(),
                    account: "teamA".to_string()
                },
                AccountAssignment {
                    user: "dave".to_string(),
                    account: "teamB".to_string()
                },
            ]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].user, "bob");
        assert_eq!(report.failures[0].code, "ACCOUNTING_COMMAND_FAILED");
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_reconcile_snapshot_honors_interrupt() {
        let snapshot = MembershipSnapshot::new("r").with_group(
            GroupEntry::new("teamA").with_member(UserEntry::new("alice", 1, 1)),
        );
        let backend = MemoryAccountingBackend::new();

        let err = AccountingReconciler::new(&backend)
            .with_interrupt(Arc::new(AtomicBool::new(true)))
            .reconcile_snapshot(&snapshot, "hpc")
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "INTERRUPTED");
        assert_eq!(backend.create_count(), 0);
    }

    #[tokio::test]
    async fn test_sacctmgr_backend_reports_exit_status() {
        // `true` prints nothing: no record. `false` exits 1.
        let empty = SacctmgrBackend::new("true", Duration::from_secs(5));
        assert_eq!(empty.show_default_account("alice").await.unwrap(), None);

        let failing = SacctmgrBackend::new("false", Duration::from_secs(5));
        let err = failing.create_user("alice", "hpc", "teamA").await.unwrap_err();
        assert_eq!(err.error_code(), "ACCOUNTING_COMMAND_FAILED");
    }

    #[tokio::test]
    async fn test_sacctmgr_backend_missing_program() {
        let backend = SacctmgrBackend::new(
            "/nonexistent/hiersync/sacctmgr",
            Duration::from_secs(5),
        );
        let err = backend.show_default_account("alice").await.unwrap_err();
        assert_eq!(err.error_code(), "ACCOUNTING_SPAWN_FAILED");
    }
}
