//! End-to-end sync run.
//!
//! Stages run strictly in order: directory -> snapshot -> cache ->
//! hierarchy, with accounting last. A failing stage stops the run; the
//! cache is only touched after a complete snapshot has been built.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hiersync_connector_ldap::DirectoryQuery;
use tracing::{info, instrument};

use crate::accounting::{AccountingBackend, AccountingReconciler};
use crate::builder::{SnapshotBuilder, UnresolvedIdentityPolicy};
use crate::cache::SnapshotCache;
use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityResolver;
use crate::materialize::{HierarchyMaterializer, DEFAULT_ADMIN_USER};
use crate::report::{CacheSummary, RunReport, SnapshotSummary};
use crate::snapshot::MembershipSnapshot;

/// Inputs of a run that do not depend on external services.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// LDAP filter selecting the member groups of the root group.
    pub root_group_query: String,
    /// Root label stored in the snapshot.
    pub root_group_label: String,
    pub cache_file: PathBuf,
    pub output_root: PathBuf,
    pub include_user_subdir: bool,
    pub admin_user: String,
    pub on_unresolved_identity: UnresolvedIdentityPolicy,
    /// Accounting cluster name.
    pub cluster: String,
}

impl SyncSettings {
    pub fn new(
        root_group_query: impl Into<String>,
        root_group_label: impl Into<String>,
        cache_file: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root_group_query: root_group_query.into(),
            root_group_label: root_group_label.into(),
            cache_file: cache_file.into(),
            output_root: output_root.into(),
            include_user_subdir: false,
            admin_user: DEFAULT_ADMIN_USER.to_string(),
            on_unresolved_identity: UnresolvedIdentityPolicy::default(),
            cluster: String::new(),
        }
    }

    #[must_use]
    pub fn with_user_subdir(mut self, include: bool) -> Self {
        self.include_user_subdir = include;
        self
    }

    #[must_use]
    pub fn with_admin_user(mut self, admin_user: impl Into<String>) -> Self {
        self.admin_user = admin_user.into();
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: UnresolvedIdentityPolicy) -> Self {
        self.on_unresolved_identity = policy;
        self
    }

    #[must_use]
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }
}

/// Drives the stages of a run and records them in a [`RunReport`].
pub struct SyncPipeline<'a> {
    settings: SyncSettings,
    resolver: &'a dyn IdentityResolver,
    interrupt: Arc<AtomicBool>,
}

impl<'a> SyncPipeline<'a> {
    pub fn new(settings: SyncSettings, resolver: &'a dyn IdentityResolver) -> Self {
        Self {
            settings,
            resolver,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an interrupt flag (set by a signal handler).
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    fn cache(&self) -> SnapshotCache {
        SnapshotCache::new(&self.settings.cache_file)
    }

    fn checkpoint(&self, stage: &str) -> SyncResult<()> {
        if self.interrupt.load(Ordering::SeqCst) {
            return Err(SyncError::Interrupted {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }

    /// Full run. `accounting` is skipped when `None`.
    #[instrument(skip_all, fields(root = %self.settings.root_group_label))]
    pub async fn run(
        &self,
        directory: &dyn DirectoryQuery,
        accounting: Option<&dyn AccountingBackend>,
        materialize: bool,
    ) -> SyncResult<RunReport> {
        let mut report = RunReport::begin();

        let snapshot = self.refresh_snapshot(directory, &mut report).await?;

        if materialize {
            self.checkpoint("materialization")?;
            self.materialize_into(&snapshot, &mut report).await?;
        }

        if let Some(backend) = accounting {
            self.checkpoint("accounting")?;
            self.reconcile_accounts_into(backend, &snapshot, &mut report)
                .await?;
        }

        Ok(report.finish())
    }

    /// Query the directory and reconcile the cache only.
    pub async fn snapshot(&self, directory: &dyn DirectoryQuery) -> SyncResult<RunReport> {
        let mut report = RunReport::begin();
        self.refresh_snapshot(directory, &mut report).await?;
        Ok(report.finish())
    }

    /// Apply the cached snapshot to the output root.
    pub async fn materialize_cached(&self) -> SyncResult<RunReport> {
        let mut report = RunReport::begin();
        let snapshot = self.load_cached(&mut report)?;
        self.materialize_into(&snapshot, &mut report).await?;
        Ok(report.finish())
    }

    /// Reconcile accounting from the cached snapshot.
    pub async fn accounts_cached(&self, backend: &dyn AccountingBackend) -> SyncResult<RunReport> {
        let mut report = RunReport::begin();
        let snapshot = self.load_cached(&mut report)?;
        self.reconcile_accounts_into(backend, &snapshot, &mut report)
            .await?;
        Ok(report.finish())
    }

    async fn refresh_snapshot(
        &self,
        directory: &dyn DirectoryQuery,
        report: &mut RunReport,
    ) -> SyncResult<MembershipSnapshot> {
        let cache = self.cache();
        cache.ensure_regular_file()?;

        let outcome = SnapshotBuilder::new(directory, self.resolver)
            .with_policy(self.settings.on_unresolved_identity)
            .build(
                &self.settings.root_group_query,
                &self.settings.root_group_label,
            )
            .await?;
        report.snapshot = Some(SnapshotSummary::new(
            &outcome.snapshot,
            outcome.skipped_users,
        ));

        self.checkpoint("cache update")?;
        let reconciled = cache.reconcile(&outcome.snapshot)?;
        report.cache = Some(CacheSummary::new(cache.path(), &reconciled));

        Ok(reconciled.snapshot)
    }

    fn load_cached(&self, report: &mut RunReport) -> SyncResult<MembershipSnapshot> {
        let snapshot = self.cache().load()?;
        info!(
            groups = snapshot.groups.len(),
            memberships = snapshot.membership_count(),
            "Loaded cached snapshot"
        );
        report.snapshot = Some(SnapshotSummary::new(&snapshot, Vec::new()));
        Ok(snapshot)
    }

    async fn materialize_into(
        &self,
        snapshot: &MembershipSnapshot,
        report: &mut RunReport,
    ) -> SyncResult<()> {
        let outcome = HierarchyMaterializer::new(self.resolver)
            .with_admin_user(&self.settings.admin_user)
            .with_user_subdir(self.settings.include_user_subdir)
            .with_interrupt(Arc::clone(&self.interrupt))
            .materialize(&self.settings.output_root, snapshot)
            .await?;
        report.materialize = Some(outcome);
        Ok(())
    }

    async fn reconcile_accounts_into(
        &self,
        backend: &dyn AccountingBackend,
        snapshot: &MembershipSnapshot,
        report: &mut RunReport,
    ) -> SyncResult<()> {
        if self.settings.cluster.is_empty() {
            return Err(SyncError::configuration(
                "accounting cluster name is not configured",
            ));
        }
        let outcome = AccountingReconciler::new(backend)
            .with_interrupt(Arc::clone(&self.interrupt))
            .reconcile_snapshot(snapshot, &self.settings.cluster)
            .await?;
        report.accounting = Some(outcome);
        Ok(())
    }
}
