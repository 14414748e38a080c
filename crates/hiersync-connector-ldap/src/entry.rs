//! Directory search result records.

use std::collections::HashMap;

use ldap3::SearchEntry;

/// A single record returned by a directory search.
///
/// The distinguished name is carried as its own field, so callers never
/// need to parse it out of a textual rendering of the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute name to values, names as spelled by the server.
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Create an entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    /// Builder method to append a value to an attribute.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.entry(name.into()).or_default().push(value.into());
        self
    }

    /// All values of an attribute. Attribute names compare case-insensitively
    /// as in LDAP; a missing attribute yields an empty slice.
    pub fn values(&self, name: &str) -> &[String] {
        if let Some(values) = self.attrs.get(name) {
            return values;
        }
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// First non-blank value of an attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name)
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        // Binary attributes are not used by membership sync.
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
        }
    }
}
