//! Filesystem hierarchy materialization.
//!
//! Layout under the output root, per group in snapshot order:
//!
//! | Path | Mode | Owner | Group |
//! |------|------|-------|-------|
//! | `<root>/<group>` | `02750` | admin | group gid |
//! | `<root>/<group>/<group>` (optional) | `0750` | admin | group gid |
//! | `<root>/<group>/<user>` | `0700` | user uid | user gid |
//!
//! Work is split in two phases. [`HierarchyMaterializer::plan`] resolves
//! every id and validates every name without touching the filesystem;
//! [`HierarchyMaterializer::apply`] then creates or repairs directories.
//! Existing directories are only modified where owner or mode differ.

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::unistd::{chown, Gid, Uid};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::{SyncError, SyncResult};
use crate::identity::{require_group_gid, require_user_uid, IdentityResolver};
use crate::snapshot::MembershipSnapshot;

/// Group directory: `rwxr-s---`.
pub const GROUP_DIR_MODE: u32 = 0o2750;
/// Group-private subfolder: `rwxr-x---`.
pub const PRIVATE_DIR_MODE: u32 = 0o750;
/// Mode requested when creating a user directory.
pub const USER_DIR_CREATE_MODE: u32 = 0o740;
/// Final user directory mode: `rwx------`.
pub const USER_DIR_MODE: u32 = 0o700;

/// Default owner of group directories.
pub const DEFAULT_ADMIN_USER: &str = "root";

/// Role of a directory in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    Group,
    GroupPrivate,
    User,
}

/// Target state of one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySpec {
    pub path: PathBuf,
    pub kind: DirectoryKind,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub create_mode: u32,
}

/// Directories of one group, in creation order.
#[derive(Debug, Clone)]
pub struct GroupPlan {
    pub name: String,
    pub directories: Vec<DirectorySpec>,
}

/// Fully resolved target state of the hierarchy.
#[derive(Debug, Clone)]
pub struct HierarchyPlan {
    pub output_root: PathBuf,
    pub groups: Vec<GroupPlan>,
}

impl HierarchyPlan {
    pub fn directory_count(&self) -> usize {
        self.groups.iter().map(|g| g.directories.len()).sum()
    }
}

/// Counters of an apply run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub groups: usize,
    pub created: usize,
    pub repaired: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectoryOutcome {
    Created,
    Repaired,
    Unchanged,
}

/// Applies a snapshot onto a directory tree.
pub struct HierarchyMaterializer<'a, R: ?Sized> {
    resolver: &'a R,
    admin_user: String,
    include_user_subdir: bool,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a, R> HierarchyMaterializer<'a, R>
where
    R: IdentityResolver + ?Sized,
{
    pub fn new(resolver: &'a R) -> Self {
        Self {
            resolver,
            admin_user: DEFAULT_ADMIN_USER.to_string(),
            include_user_subdir: false,
            interrupt: None,
        }
    }

    /// Set the owner of group and group-private directories.
    #[must_use]
    pub fn with_admin_user(mut self, admin_user: impl Into<String>) -> Self {
        self.admin_user = admin_user.into();
        self
    }

    /// Create `<group>/<group>` for groups with at least one member.
    #[must_use]
    pub fn with_user_subdir(mut self, include: bool) -> Self {
        self.include_user_subdir = include;
        self
    }

    /// Flag checked between groups; when set the run stops with
    /// [`SyncError::Interrupted`].
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Plan, then apply.
    pub async fn materialize(
        &self,
        output_root: &Path,
        snapshot: &MembershipSnapshot,
    ) -> SyncResult<MaterializeReport> {
        let plan = self.plan(output_root, snapshot).await?;
        self.apply(&plan)
    }

    /// Resolve the admin uid and every group gid, and validate names.
    /// Performs no filesystem writes.
    #[instrument(skip(self, snapshot), fields(output_root = %output_root.display()))]
    pub async fn plan(
        &self,
        output_root: &Path,
        snapshot: &MembershipSnapshot,
    ) -> SyncResult<HierarchyPlan> {
        match fs::metadata(output_root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(SyncError::configuration(format!(
                    "output root {} is not a directory",
                    output_root.display()
                )))
            }
            Err(e) => {
                return Err(SyncError::configuration(format!(
                    "output root {} is not accessible: {e}",
                    output_root.display()
                )))
            }
        }

        let admin_uid = require_user_uid(self.resolver, &self.admin_user).await?;
        debug!(admin = %self.admin_user, uid = admin_uid, "Resolved admin user");

        let mut groups = Vec::with_capacity(snapshot.groups.len());

        for group in &snapshot.groups {
            check_component(output_root, &group.name)?;
            let gid = require_group_gid(self.resolver, &group.name).await?;

            let group_dir = output_root.join(&group.name);
            let mut directories = vec![DirectorySpec {
                path: group_dir.clone(),
                kind: DirectoryKind::Group,
                uid: admin_uid,
                gid,
                mode: GROUP_DIR_MODE,
                create_mode: PRIVATE_DIR_MODE,
            }];

            if self.include_user_subdir && !group.members.is_empty() {
                directories.push(DirectorySpec {
                    path: group_dir.join(&group.name),
                    kind: DirectoryKind::GroupPrivate,
                    uid: admin_uid,
                    gid,
                    mode: PRIVATE_DIR_MODE,
                    create_mode: PRIVATE_DIR_MODE,
                });
            }

            for user in &group.members {
                check_component(&group_dir, &user.name)?;
                directories.push(DirectorySpec {
                    path: group_dir.join(&user.name),
                    kind: DirectoryKind::User,
                    uid: user.uid,
                    gid: user.gid,
                    mode: USER_DIR_MODE,
                    create_mode: USER_DIR_CREATE_MODE,
                });
            }

            groups.push(GroupPlan {
                name: group.name.clone(),
                directories,
            });
        }

        Ok(HierarchyPlan {
            output_root: output_root.to_path_buf(),
            groups,
        })
    }

    /// Create or repair every planned directory. Stops at the first
    /// failure; directories already handled stay as they are.
    #[instrument(skip(self, plan), fields(output_root = %plan.output_root.display()))]
    pub fn apply(&self, plan: &HierarchyPlan) -> SyncResult<MaterializeReport> {
        let mut report = MaterializeReport::default();
        debug!(
            groups = plan.groups.len(),
            directories = plan.directory_count(),
            "Applying hierarchy plan"
        );

        for group in &plan.groups {
            if self.interrupted() {
                return Err(SyncError::Interrupted {
                    stage: format!("materializing group {}", group.name),
                });
            }

            for spec in &group.directories {
                match ensure_directory(spec)? {
                    DirectoryOutcome::Created => report.created += 1,
                    DirectoryOutcome::Repaired => report.repaired += 1,
                    DirectoryOutcome::Unchanged => report.unchanged += 1,
                }
            }
            report.groups += 1;
        }

        info!(
            groups = report.groups,
            created = report.created,
            repaired = report.repaired,
            unchanged = report.unchanged,
            "Hierarchy materialized"
        );

        Ok(report)
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Reject names that are not a single normal path component.
fn check_component(parent: &Path, name: &str) -> SyncResult<()> {
    let problem = if name.is_empty() {
        Some("empty name")
    } else if name == "." || name == ".." {
        Some("relative path component")
    } else if name.contains('/') {
        Some("name contains '/'")
    } else if name.contains('\0') {
        Some("name contains NUL")
    } else {
        None
    };

    match problem {
        Some(problem) => Err(SyncError::materialization(
            parent,
            format!("refusing to use {name:?} as a directory name: {problem}"),
            None,
        )),
        None => Ok(()),
    }
}

/// Bring one directory to its target owner and mode.
///
/// Ownership goes first: changing owner or group may clear the setgid bit,
/// which the following chmod restores.
fn ensure_directory(spec: &DirectorySpec) -> SyncResult<DirectoryOutcome> {
    let path = spec.path.as_path();

    let created = match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(SyncError::materialization(
                path,
                "path is a symlink, refusing to follow it",
                None,
            ));
        }
        Ok(meta) if !meta.is_dir() => {
            return Err(SyncError::materialization(
                path,
                "path exists but is not a directory",
                None,
            ));
        }
        Ok(_) => false,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            DirBuilder::new()
                .mode(spec.create_mode)
                .create(path)
                .map_err(|e| SyncError::materialization(path, "mkdir failed", Some(e)))?;
            debug!(path = %path.display(), kind = ?spec.kind, "Created directory");
            true
        }
        Err(e) => return Err(SyncError::materialization(path, "stat failed", Some(e))),
    };

    let mut changed = false;

    let meta = stat(path)?;
    if meta.uid() != spec.uid || meta.gid() != spec.gid {
        chown(
            path,
            Some(Uid::from_raw(spec.uid)),
            Some(Gid::from_raw(spec.gid)),
        )
        .map_err(|errno| {
            SyncError::materialization(
                path,
                format!("chown to {}:{} failed", spec.uid, spec.gid),
                Some(io::Error::from(errno)),
            )
        })?;
        changed = true;
    }

    let mode = stat(path)?.permissions().mode() & 0o7777;
    if mode != spec.mode {
        fs::set_permissions(path, fs::Permissions::from_mode(spec.mode)).map_err(|e| {
            SyncError::materialization(path, format!("chmod to {:o} failed", spec.mode), Some(e))
        })?;
        changed = true;
    }

    Ok(if created {
        DirectoryOutcome::Created
    } else if changed {
        debug!(path = %path.display(), kind = ?spec.kind, "Repaired directory");
        DirectoryOutcome::Repaired
    } else {
        DirectoryOutcome::Unchanged
    })
}

fn stat(path: &Path) -> SyncResult<fs::Metadata> {
    fs::symlink_metadata(path).map_err(|e| SyncError::materialization(path, "stat failed", Some(e)))
}
