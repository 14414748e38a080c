//! Membership snapshot model.
//!
//! A snapshot is the flattened root group -> member groups -> member users
//! tree with local uid/gid attached to every user. On disk it is stored as
//!
//! ```json
//! {
//!     "hpc.users": [
//!         {
//!             "teamA": [
//!                 {
//!                     "alice": {
//!                         "gid": 2001,
//!                         "uid": 1001
//!                     }
//!                 }
//!             ]
//!         }
//!     ]
//! }
//! ```
//!
//! Equality is structural: group order, member order and JSON key order do
//! not participate.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Local numeric ids of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosixIds {
    pub uid: u32,
    pub gid: u32,
}

/// A directory user with its resolved local ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl UserEntry {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    pub fn ids(&self) -> PosixIds {
        PosixIds {
            uid: self.uid,
            gid: self.gid,
        }
    }
}

/// A member group of the root group. Zero members is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub members: Vec<UserEntry>,
}

impl GroupEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Builder method to append a member.
    #[must_use]
    pub fn with_member(mut self, member: UserEntry) -> Self {
        self.members.push(member);
        self
    }

    /// Whether a member with this name is already present.
    pub fn has_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }
}

/// Root label plus its member groups, in directory return order.
#[derive(Debug, Clone, Eq)]
pub struct MembershipSnapshot {
    pub root: String,
    pub groups: Vec<GroupEntry>,
}

impl MembershipSnapshot {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            groups: Vec::new(),
        }
    }

    /// Builder method to append a group.
    #[must_use]
    pub fn with_group(mut self, group: GroupEntry) -> Self {
        self.groups.push(group);
        self
    }

    /// Look up a group by name.
    pub fn group(&self, name: &str) -> Option<&GroupEntry> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Total number of memberships (a user in two groups counts twice).
    pub fn membership_count(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }

    /// Every (group, user) pair in snapshot order.
    pub fn memberships(&self) -> impl Iterator<Item = (&GroupEntry, &UserEntry)> {
        self.groups
            .iter()
            .flat_map(|g| g.members.iter().map(move |u| (g, u)))
    }

    /// Serialize with sorted keys, 4-space indentation and a trailing
    /// newline. Equal snapshots built in the same order serialize to the
    /// same bytes.
    pub fn to_canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        // serde_json::Value objects are key-sorted.
        let value = serde_json::to_value(self)?;
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut ser)?;
        buf.push(b'\n');
        Ok(buf)
    }

    /// Parse the on-disk format.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    fn canonical(&self) -> BTreeMap<&str, BTreeMap<&str, PosixIds>> {
        self.groups
            .iter()
            .map(|g| {
                let members: BTreeMap<&str, PosixIds> = g
                    .members
                    .iter()
                    .map(|u| (u.name.as_str(), u.ids()))
                    .collect();
                (g.name.as_str(), members)
            })
            .collect()
    }
}

impl PartialEq for MembershipSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.canonical() == other.canonical()
    }
}

// On-disk shape: every level is a single-key object.

impl Serialize for UserEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.ids())?;
        map.end()
    }
}

impl Serialize for GroupEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.members)?;
        map.end()
    }
}

impl Serialize for MembershipSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.root, &self.groups)?;
        map.end()
    }
}

fn single_entry<V, E: serde::de::Error>(
    map: BTreeMap<String, V>,
    what: &str,
) -> Result<(String, V), E> {
    if map.len() != 1 {
        return Err(E::custom(format!(
            "{what} must be an object with exactly one key, found {}",
            map.len()
        )));
    }
    map.into_iter()
        .next()
        .ok_or_else(|| E::custom(format!("{what} is empty")))
}

impl<'de> Deserialize<'de> for UserEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, PosixIds>::deserialize(deserializer)?;
        let (name, ids) = single_entry::<_, D::Error>(raw, "user entry")?;
        Ok(UserEntry::new(name, ids.uid, ids.gid))
    }
}

impl<'de> Deserialize<'de> for GroupEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Vec<UserEntry>>::deserialize(deserializer)?;
        let (name, members) = single_entry::<_, D::Error>(raw, "group entry")?;
        Ok(GroupEntry { name, members })
    }
}

impl<'de> Deserialize<'de> for MembershipSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Vec<GroupEntry>>::deserialize(deserializer)?;
        let (root, groups) = single_entry::<_, D::Error>(raw, "snapshot")?;
        Ok(MembershipSnapshot { root, groups })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MembershipSnapshot {
        MembershipSnapshot::new("hpc.users")
            .with_group(
                GroupEntry::new("teamA")
                    .with_member(UserEntry::new("alice", 1001, 2001))
                    .with_member(UserEntry::new("bob", 1002, 2002)),
            )
            .with_group(GroupEntry::new("teamB"))
    }

    #[test]
    fn test_canonical_json_layout() {
        let snapshot = MembershipSnapshot::new("hpc.users").with_group(
            GroupEntry::new("teamA").with_member(UserEntry::new("alice", 1001, 2001)),
        );

        let json = String::from_utf8(snapshot.to_canonical_json().unwrap()).unwrap();
        let expected = r#"{
    "hpc.users": [
        {
            "teamA": [
                {
                    "alice": {
                        "gid": 2001,
                        "uid": 1001
                    }
                }
            ]
        }
    ]
}
"#;
        assert_eq!(json, expected);
    }

    #[test]
    fn test_parse_canonical_output() {
        let snapshot = sample();
        let bytes = snapshot.to_canonical_json().unwrap();
        let parsed = MembershipSnapshot::from_json(&bytes).unwrap();

        assert_eq!(parsed.root, "hpc.users");
        assert_eq!(parsed.groups[0].members[1], UserEntry::new("bob", 1002, 2002));
        assert!(parsed.group("teamB").unwrap().members.is_empty());
    }

    #[test]
    fn test_equality_ignores_ordering() {
        let reordered = MembershipSnapshot::new("hpc.users")
            .with_group(GroupEntry::new("teamB"))
            .with_group(
                GroupEntry::new("teamA")
                    .with_member(UserEntry::new("bob", 1002, 2002))
                    .with_member(UserEntry::new("alice", 1001, 2001)),
            );

        assert_eq!(sample(), reordered);
    }

    #[test]
    fn test_equality_detects_id_change() {
        let mut changed = sample();
        changed.groups[0].members[0].gid = 9999;
        assert_ne!(sample(), changed);

        let mut renamed_root = sample();
        renamed_root.root = "hpc.staff".to_string();
        assert_ne!(sample(), renamed_root);

        let mut dropped_group = sample();
        dropped_group.groups.pop();
        assert_ne!(sample(), dropped_group);
    }

    #[test]
    fn test_parse_rejects_multiple_roots() {
        let json = br#"{"a": [], "b": []}"#;
        let err = MembershipSnapshot::from_json(json).unwrap_err();
        assert!(err.to_string().contains("exactly one key"));
    }

    #[test]
    fn test_parse_rejects_legacy_uid_only_users() {
        let json = br#"{"hpc.users": [{"teamA": [{"alice": 1001}]}]}"#;
        assert!(MembershipSnapshot::from_json(json).is_err());
    }

    #[test]
    fn test_memberships_iterates_in_order() {
        let snapshot = sample();
        let pairs: Vec<(&str, &str)> = snapshot
            .memberships()
            .map(|(g, u)| (g.name.as_str(), u.name.as_str()))
            .collect();

        assert_eq!(pairs, vec![("teamA", "alice"), ("teamA", "bob")]);
        assert_eq!(snapshot.membership_count(), 2);
    }
}
