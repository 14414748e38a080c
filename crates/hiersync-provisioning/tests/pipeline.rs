//! Full runs against a fake directory, a temp cache and a temp output root.

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{own_resolver, FakeDirectory, ROOT_QUERY};
use hiersync_provisioning::{
    MemoryAccountingBackend, MembershipSnapshot, RunStatus, SyncError, SyncPipeline, SyncSettings,
};
use tempfile::TempDir;

const TEAM_A: &str = "CN=teamA,OU=Groups,DC=example,DC=org";
const TEAM_B: &str = "CN=teamB,OU=Groups,DC=example,DC=org";

struct Workspace {
    _dir: TempDir,
    settings: SyncSettings,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cache_file = dir.path().join("state/groups.json");
        let output_root = dir.path().join("groups");
        fs::create_dir_all(cache_file.parent().unwrap()).unwrap();
        fs::write(&cache_file, b"").unwrap();
        fs::create_dir(&output_root).unwrap();

        let settings = SyncSettings::new(ROOT_QUERY, "hpc.users", cache_file, output_root)
            .with_user_subdir(true)
            .with_admin_user("admin")
            .with_cluster("hpc");

        Self {
            _dir: dir,
            settings,
        }
    }

    fn cache_file(&self) -> &Path {
        &self.settings.cache_file
    }

    fn output(&self, rel: &str) -> std::path::PathBuf {
        self.settings.output_root.join(rel)
    }

    fn archives(&self) -> usize {
        fs::read_dir(self.cache_file().parent().unwrap())
            .unwrap()
            .filter(|e| {
                let name = e.as_ref().unwrap().file_name();
                let name = name.to_string_lossy();
                name != "groups.json" && name.ends_with("_groups.json")
            })
            .count()
    }
}

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o7777
}

fn directory() -> FakeDirectory {
    FakeDirectory::new()
        .with_group(TEAM_A, "teamA", &["alice", "bob"])
        .with_group(TEAM_B, "teamB", &[])
}

#[tokio::test]
async fn test_full_run_populates_cache_hierarchy_and_accounts() {
    let ws = Workspace::new();
    let resolver = own_resolver(&["alice", "bob"], &["teamA", "teamB"]);
    let accounting = MemoryAccountingBackend::new();
    let pipeline = SyncPipeline::new(ws.settings.clone(), &resolver);

    let report = pipeline
        .run(&directory(), Some(&accounting), true)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let cache = report.cache.as_ref().unwrap();
    assert!(cache.changed);
    assert!(cache.archived.is_none());

    let cached = MembershipSnapshot::from_json(&fs::read(ws.cache_file()).unwrap()).unwrap();
    assert_eq!(cached.membership_count(), 2);
    assert!(cached.group("teamB").unwrap().members.is_empty());

    assert_eq!(mode_of(&ws.output("teamA")), 0o2750);
    assert_eq!(mode_of(&ws.output("teamA/teamA")), 0o750);
    assert_eq!(mode_of(&ws.output("teamA/alice")), 0o700);
    assert_eq!(mode_of(&ws.output("teamA/bob")), 0o700);
    assert_eq!(mode_of(&ws.output("teamB")), 0o2750);
    assert!(!ws.output("teamB/teamB").exists());

    let materialized = report.materialize.unwrap();
    assert_eq!(materialized.created, 5);

    let accounts = report.accounting.unwrap();
    assert_eq!(accounts.created.len(), 2);
    assert_eq!(accounting.default_account("bob"), Some("teamA".to_string()));
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let ws = Workspace::new();
    let resolver = own_resolver(&["alice", "bob"], &["teamA", "teamB"]);
    let accounting = MemoryAccountingBackend::new();
    let pipeline = SyncPipeline::new(ws.settings.clone(), &resolver);

    pipeline
        .run(&directory(), Some(&accounting), true)
        .await
        .unwrap();
    let cache_bytes = fs::read(ws.cache_file()).unwrap();

    let second = pipeline
        .run(&directory(), Some(&accounting), true)
        .await
        .unwrap();

    assert!(!second.cache.unwrap().changed);
    assert_eq!(fs::read(ws.cache_file()).unwrap(), cache_bytes);
    assert_eq!(ws.archives(), 0);

    let materialized = second.materialize.unwrap();
    assert_eq!(materialized.created, 0);
    assert_eq!(materialized.repaired, 0);
    assert_eq!(materialized.unchanged, 5);

    assert!(second.accounting.unwrap().created.is_empty());
    assert_eq!(accounting.create_count(), 2);
}

#[tokio::test]
async fn test_membership_change_archives_previous_cache() {
    let ws = Workspace::new();
    let resolver = own_resolver(&["alice", "bob", "carol"], &["teamA", "teamB"]);
    let pipeline = SyncPipeline::new(ws.settings.clone(), &resolver);

    pipeline.snapshot(&directory()).await.unwrap();
    let before = fs::read(ws.cache_file()).unwrap();

    let changed = FakeDirectory::new()
        .with_group(TEAM_A, "teamA", &["alice", "bob"])
        .with_group(TEAM_B, "teamB", &["carol"]);
    let report = pipeline.snapshot(&changed).await.unwrap();

    let archive = report.cache.unwrap().archived.unwrap();
    assert_eq!(fs::read(archive).unwrap(), before);
    assert_eq!(ws.archives(), 1);
    assert!(report.materialize.is_none());
    assert!(!ws.output("teamB").exists());
}

#[tokio::test]
async fn test_missing_cache_file_fails_before_querying() {
    let ws = Workspace::new();
    fs::remove_file(ws.cache_file()).unwrap();
    let resolver = own_resolver(&["alice", "bob"], &["teamA", "teamB"]);
    let directory = directory();

    let err = SyncPipeline::new(ws.settings.clone(), &resolver)
        .run(&directory, None, true)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Configuration { .. }));
    assert!(directory.queries().is_empty());
    assert_eq!(fs::read_dir(&ws.settings.output_root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_directory_failure_leaves_cache_untouched() {
    let ws = Workspace::new();
    fs::write(ws.cache_file(), b"previous").unwrap();
    let resolver = own_resolver(&["alice", "bob"], &["teamA", "teamB"]);

    let err = SyncPipeline::new(ws.settings.clone(), &resolver)
        .run(&directory().rejecting_bind(), None, true)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "DIRECTORY_QUERY_ERROR");
    assert_eq!(fs::read(ws.cache_file()).unwrap(), b"previous");
    assert_eq!(ws.archives(), 0);
}

#[tokio::test]
async fn test_cached_snapshot_drives_materialize_and_accounts() {
    let ws = Workspace::new();
    let resolver = own_resolver(&["alice", "bob"], &["teamA", "teamB"]);
    let pipeline = SyncPipeline::new(ws.settings.clone(), &resolver);

    // Cache is empty: nothing to materialize from yet.
    let err = pipeline.materialize_cached().await.unwrap_err();
    assert_eq!(err.error_code(), "CACHE_ERROR");

    pipeline.snapshot(&directory()).await.unwrap();

    let report = pipeline.materialize_cached().await.unwrap();
    assert_eq!(report.materialize.unwrap().created, 5);
    assert!(report.cache.is_none());

    let accounting = MemoryAccountingBackend::new()
        .with_default("alice", "legacy")
        .with_failure("bob");
    let report = pipeline.accounts_cached(&accounting).await.unwrap();
    assert_eq!(report.status, RunStatus::CompletedWithFailures);
    let accounts = report.accounting.unwrap();
    assert_eq!(accounts.existing, 1);
    assert_eq!(accounts.failures.len(), 1);
}

#[tokio::test]
async fn test_interrupt_stops_before_materialization() {
    let ws = Workspace::new();
    let resolver = own_resolver(&["alice", "bob"], &["teamA", "teamB"]);
    let flag = Arc::new(AtomicBool::new(false));
    let pipeline =
        SyncPipeline::new(ws.settings.clone(), &resolver).with_interrupt(Arc::clone(&flag));

    pipeline.snapshot(&directory()).await.unwrap();
    flag.store(true, std::sync::atomic::Ordering::SeqCst);

    let err = pipeline.materialize_cached().await.unwrap_err();

    assert!(matches!(err, SyncError::Interrupted { .. }));
    assert!(!ws.output("teamA").exists());
}
