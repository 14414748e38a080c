//! Shared test doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use hiersync_connector_ldap::filter::user_members_of;
use hiersync_connector_ldap::{DirectoryEntry, DirectoryError, DirectoryQuery, DirectoryResult};
use hiersync_provisioning::MemoryIdentityResolver;
use nix::unistd::{getgid, getuid};

pub const ROOT_QUERY: &str =
    "(&(objectClass=group)(memberOf=CN=hpc.users,OU=Groups,DC=example,DC=org))";

/// In-memory directory answering fixed filters.
#[derive(Default)]
pub struct FakeDirectory {
    responses: HashMap<String, Vec<DirectoryEntry>>,
    reject_bind: bool,
    queries: Mutex<Vec<String>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `filter` with `entries`.
    pub fn with_response(
        mut self,
        filter: impl Into<String>,
        entries: Vec<DirectoryEntry>,
    ) -> Self {
        self.responses.insert(filter.into(), entries);
        self
    }

    /// Register a member group of the root group and its users.
    pub fn with_group(mut self, dn: &str, name: &str, users: &[&str]) -> Self {
        self.responses
            .entry(ROOT_QUERY.to_string())
            .or_default()
            .push(group_entry(dn, name));
        self.responses.insert(
            user_members_of(dn),
            users.iter().map(|u| user_entry(u)).collect(),
        );
        self
    }

    /// Fail every search like a rejected bind.
    pub fn rejecting_bind(mut self) -> Self {
        self.reject_bind = true;
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DirectoryQuery for FakeDirectory {
    async fn search(
        &self,
        filter: &str,
        _attributes: &[&str],
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(filter.to_string());
        }
        if self.reject_bind {
            return Err(DirectoryError::AuthenticationFailed {
                bind_user: "CN=svc-sync,OU=Service,DC=example,DC=org".to_string(),
            });
        }
        Ok(self.responses.get(filter).cloned().unwrap_or_default())
    }
}

pub fn group_entry(dn: &str, name: &str) -> DirectoryEntry {
    DirectoryEntry::new(dn)
        .with("cn", name)
        .with("sAMAccountName", name)
}

pub fn user_entry(account: &str) -> DirectoryEntry {
    DirectoryEntry::new(format!("CN={account},OU=People,DC=example,DC=org"))
        .with("sAMAccountName", account)
}

/// uid/gid of the test process, so ownership changes need no privileges.
pub fn own_ids() -> (u32, u32) {
    (getuid().as_raw(), getgid().as_raw())
}

/// Resolver mapping every given account and group onto the test process.
pub fn own_resolver(accounts: &[&str], groups: &[&str]) -> MemoryIdentityResolver {
    let (uid, gid) = own_ids();
    let mut resolver = MemoryIdentityResolver::new().with_user("admin", uid);
    for account in accounts {
        resolver = resolver.with_account(account, uid, gid);
    }
    for group in groups {
        resolver = resolver.with_group(*group, gid);
    }
    resolver
}
