//! Local identity resolution.
//!
//! Directory users are mapped onto the local passwd/group namespace by
//! name. The mapping follows the site convention for group-mirroring
//! accounts: a directory account `alice` takes its uid from the local user
//! `alice` and its gid from the local group `lg.alice`.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use nix::unistd::{Group, User};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::snapshot::PosixIds;

/// Prefix of the per-account group that supplies a member's gid.
pub const MIRROR_GROUP_PREFIX: &str = "lg.";

/// Name of the group mirroring `account`.
pub fn mirror_group_name(account: &str) -> String {
    format!("{MIRROR_GROUP_PREFIX}{account}")
}

/// Name -> numeric id lookups against the local identity namespace.
///
/// `Ok(None)` means the name does not exist; `Err` means the lookup itself
/// failed (timeout, NSS backend error).
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// uid of a local user account.
    async fn user_uid(&self, name: &str) -> SyncResult<Option<u32>>;

    /// gid of a local group.
    async fn group_gid(&self, name: &str) -> SyncResult<Option<u32>>;
}

/// uid of `name`, or an identity error when it does not exist.
pub async fn require_user_uid<R>(resolver: &R, name: &str) -> SyncResult<u32>
where
    R: IdentityResolver + ?Sized,
{
    resolver
        .user_uid(name)
        .await?
        .ok_or_else(|| SyncError::identity(name, "no local user account"))
}

/// gid of `name`, or an identity error when it does not exist.
pub async fn require_group_gid<R>(resolver: &R, name: &str) -> SyncResult<u32>
where
    R: IdentityResolver + ?Sized,
{
    resolver
        .group_gid(name)
        .await?
        .ok_or_else(|| SyncError::identity(name, "no local group"))
}

/// Resolve a directory account to `{uid of account, gid of lg.account}`.
pub async fn resolve_member_ids<R>(resolver: &R, account: &str) -> SyncResult<PosixIds>
where
    R: IdentityResolver + ?Sized,
{
    let uid = require_user_uid(resolver, account).await?;
    let gid = require_group_gid(resolver, &mirror_group_name(account)).await?;
    Ok(PosixIds { uid, gid })
}

/// Resolver backed by the system passwd/group databases (NSS).
///
/// Lookups may block on a remote NSS backend (sssd, LDAP), so each one runs
/// on the blocking pool under a deadline.
#[derive(Debug, Clone)]
pub struct SystemIdentityResolver {
    timeout: Duration,
}

impl SystemIdentityResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn lookup<T, F>(&self, name: &str, query: F) -> SyncResult<Option<T>>
    where
        T: Send + 'static,
        F: FnOnce(String) -> nix::Result<Option<T>> + Send + 'static,
    {
        let owned = name.to_string();
        let task = tokio::task::spawn_blocking(move || query(owned));

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(SyncError::identity_lookup(
                name,
                format!("lookup timed out after {}s", self.timeout.as_secs()),
            )),
            Ok(Err(join_err)) => Err(SyncError::identity_lookup(
                name,
                format!("lookup task failed: {join_err}"),
            )),
            Ok(Ok(Err(errno))) => Err(SyncError::identity_lookup(
                name,
                format!("lookup failed: {errno}"),
            )),
            Ok(Ok(Ok(found))) => Ok(found),
        }
    }
}

impl Default for SystemIdentityResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl IdentityResolver for SystemIdentityResolver {
    async fn user_uid(&self, name: &str) -> SyncResult<Option<u32>> {
        let uid = self
            .lookup(name, |n| {
                Ok(User::from_name(&n)?.map(|user| user.uid.as_raw()))
            })
            .await?;
        debug!(name = %name, uid = ?uid, "Resolved local user");
        Ok(uid)
    }

    /// Checks the group database first, then falls back to the primary gid
    /// of a passwd entry with the same name (group-mirroring accounts).
    async fn group_gid(&self, name: &str) -> SyncResult<Option<u32>> {
        let gid = self
            .lookup(name, |n| match Group::from_name(&n)? {
                Some(group) => Ok(Some(group.gid.as_raw())),
                None => Ok(User::from_name(&n)?.map(|user| user.gid.as_raw())),
            })
            .await?;
        debug!(name = %name, gid = ?gid, "Resolved local group");
        Ok(gid)
    }
}

/// In-memory resolver for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityResolver {
    users: HashMap<String, u32>,
    groups: HashMap<String, u32>,
    failing: HashSet<String>,
}

impl MemoryIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, name: impl Into<String>, uid: u32) -> Self {
        self.users.insert(name.into(), uid);
        self
    }

    #[must_use]
    pub fn with_group(mut self, name: impl Into<String>, gid: u32) -> Self {
        self.groups.insert(name.into(), gid);
        self
    }

    /// Register `account` as a user with uid `uid` and its `lg.` group with
    /// gid `gid`.
    #[must_use]
    pub fn with_account(self, account: &str, uid: u32, gid: u32) -> Self {
        self.with_user(account, uid)
            .with_group(mirror_group_name(account), gid)
    }

    /// Make every lookup of `name` fail as if the backend errored.
    #[must_use]
    pub fn with_failure(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    fn check(&self, name: &str) -> SyncResult<()> {
        if self.failing.contains(name) {
            return Err(SyncError::identity_lookup(name, "backend unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityResolver for MemoryIdentityResolver {
    async fn user_uid(&self, name: &str) -> SyncResult<Option<u32>> {
        self.check(name)?;
        Ok(self.users.get(name).copied())
    }

    async fn group_gid(&self, name: &str) -> SyncResult<Option<u32>> {
        self.check(name)?;
        Ok(self.groups.get(name).copied())
    }
}
