//! Membership snapshot construction.
//!
//! Two directory passes: one search for the member groups of the root
//! group, then one `memberOf` search per group for its users. Every user is
//! mapped to local ids before it enters the snapshot.

use hiersync_connector_ldap::filter::user_members_of;
use hiersync_connector_ldap::{DirectoryEntry, DirectoryQuery};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{SyncError, SyncResult};
use crate::identity::{resolve_member_ids, IdentityResolver};
use crate::snapshot::{GroupEntry, MembershipSnapshot, UserEntry};

/// Attributes requested for member groups.
pub const GROUP_ATTRIBUTES: [&str; 2] = ["cn", "sAMAccountName"];

/// Attribute carrying the account name of users and groups.
pub const ACCOUNT_ATTRIBUTE: &str = "sAMAccountName";

/// What to do with a directory user that has no local identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedIdentityPolicy {
    /// Fail the whole build. A skipped user would silently vanish from the
    /// hierarchy.
    #[default]
    Abort,
    /// Leave the user out and record it in [`BuildOutcome::skipped_users`].
    Skip,
}

/// A directory user left out of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUser {
    pub group: String,
    pub account: String,
    pub reason: String,
}

/// Result of a snapshot build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub snapshot: MembershipSnapshot,
    pub skipped_users: Vec<SkippedUser>,
}

/// Builds a [`MembershipSnapshot`] from live directory data.
pub struct SnapshotBuilder<'a, D: ?Sized, R: ?Sized> {
    directory: &'a D,
    resolver: &'a R,
    policy: UnresolvedIdentityPolicy,
}

impl<'a, D, R> SnapshotBuilder<'a, D, R>
where
    D: DirectoryQuery + ?Sized,
    R: IdentityResolver + ?Sized,
{
    pub fn new(directory: &'a D, resolver: &'a R) -> Self {
        Self {
            directory,
            resolver,
            policy: UnresolvedIdentityPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: UnresolvedIdentityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Query the member groups matched by `root_group_query` and their
    /// users, labelled `root_group_label`.
    ///
    /// Groups and users keep directory return order. Duplicate group names
    /// and duplicate users within a group keep their first occurrence.
    #[instrument(skip(self), fields(policy = ?self.policy))]
    pub async fn build(
        &self,
        root_group_query: &str,
        root_group_label: &str,
    ) -> SyncResult<BuildOutcome> {
        let groups = self
            .directory
            .search(root_group_query, &GROUP_ATTRIBUTES)
            .await?;

        info!(groups = groups.len(), "Found member groups");

        let mut snapshot = MembershipSnapshot::new(root_group_label);
        let mut skipped_users = Vec::new();

        for group in &groups {
            let Some(name) = group_name(group) else {
                warn!(dn = %group.dn, "Skipping group without sAMAccountName or cn");
                continue;
            };
            if group.dn.is_empty() {
                warn!(group = %name, "Skipping group without a distinguished name");
                continue;
            }
            if snapshot.group(name).is_some() {
                warn!(group = %name, dn = %group.dn, "Skipping duplicate group name");
                continue;
            }

            let entry = self.build_group(name, &group.dn, &mut skipped_users).await?;
            debug!(group = %name, members = entry.members.len(), "Group assembled");
            snapshot.groups.push(entry);
        }

        info!(
            groups = snapshot.groups.len(),
            memberships = snapshot.membership_count(),
            skipped = skipped_users.len(),
            "Snapshot built"
        );

        Ok(BuildOutcome {
            snapshot,
            skipped_users,
        })
    }

    async fn build_group(
        &self,
        name: &str,
        dn: &str,
        skipped_users: &mut Vec<SkippedUser>,
    ) -> SyncResult<GroupEntry> {
        let users = self
            .directory
            .search(&user_members_of(dn), &[ACCOUNT_ATTRIBUTE])
            .await?;

        let mut entry = GroupEntry::new(name);

        for user in &users {
            let Some(account) = user.first(ACCOUNT_ATTRIBUTE) else {
                warn!(group = %name, dn = %user.dn, "Skipping user without sAMAccountName");
                continue;
            };
            if entry.has_member(account) {
                debug!(group = %name, account = %account, "Skipping duplicate member");
                continue;
            }

            match resolve_member_ids(self.resolver, account).await {
                Ok(ids) => entry.members.push(UserEntry::new(account, ids.uid, ids.gid)),
                // Only a missing identity is skippable; a failed lookup says
                // nothing about the user and must not change the snapshot.
                Err(err @ SyncError::IdentityResolution { .. })
                    if self.policy == UnresolvedIdentityPolicy::Skip =>
                {
                    warn!(
                        group = %name,
                        account = %account,
                        error = %err,
                        "Skipping user without local identity"
                    );
                    skipped_users.push(SkippedUser {
                        group: name.to_string(),
                        account: account.to_string(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Ok(entry)
    }
}

/// The group's account name, falling back to its common name.
fn group_name(entry: &DirectoryEntry) -> Option<&str> {
    entry
        .first(ACCOUNT_ATTRIBUTE)
        .or_else(|| entry.first("cn"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_name_prefers_account_name() {
        let entry = DirectoryEntry::new("CN=Team A,DC=example,DC=org")
            .with("cn", "Team A")
            .with("sAMAccountName", "teamA");
        assert_eq!(group_name(&entry), Some("teamA"));

        let cn_only = DirectoryEntry::new("CN=teamB,DC=example,DC=org").with("cn", "teamB");
        assert_eq!(group_name(&cn_only), Some("teamB"));

        assert_eq!(group_name(&DirectoryEntry::new("CN=x")), None);
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        let policy: UnresolvedIdentityPolicy = serde_json::from_str("\"skip\"").unwrap();
        assert_eq!(policy, UnresolvedIdentityPolicy::Skip);
        assert_eq!(
            UnresolvedIdentityPolicy::default(),
            UnresolvedIdentityPolicy::Abort
        );
    }
}
