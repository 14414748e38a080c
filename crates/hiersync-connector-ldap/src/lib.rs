//! # LDAP Connector
//!
//! Directory-service query client for hiersync.
//!
//! This crate binds to an LDAP/Active Directory server and runs subtree
//! searches under a configured search base. It deliberately offers nothing
//! beyond what membership sync needs: bind, search, close.
//!
//! ## Features
//!
//! - LDAP v3 simple bind over plain LDAP, LDAPS or STARTTLS
//! - Per-call connect/bind/search deadlines
//! - Bind failures reported separately from empty results
//! - RFC 4515 filter escaping
//!
//! ## Example
//!
//! ```ignore
//! use hiersync_connector_ldap::{DirectoryConfig, DirectoryQuery, LdapDirectoryClient};
//!
//! let config = DirectoryConfig::new(
//!     "ad.example.org",
//!     "DC=example,DC=org",
//!     "CN=svc-sync,OU=Service,DC=example,DC=org",
//! )
//! .with_password("secret")
//! .with_ssl();
//!
//! let client = LdapDirectoryClient::new(config)?;
//! let groups = client.search("(objectClass=group)", &["cn", "sAMAccountName"]).await?;
//! ```

pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;

// Re-exports
pub use client::{DirectoryQuery, LdapDirectoryClient};
pub use config::{ConnectionSettings, DirectoryConfig};
pub use entry::DirectoryEntry;
pub use error::{DirectoryError, DirectoryResult};
