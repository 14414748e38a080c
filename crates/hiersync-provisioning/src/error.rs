//! Sync error types.

use std::path::{Path, PathBuf};

use hiersync_connector_ldap::DirectoryError;
use thiserror::Error;

/// Errors that abort a sync run.
///
/// Per-user accounting failures are not represented here; they are
/// collected in an [`AccountingReport`](crate::accounting::AccountingReport)
/// so the rest of the batch keeps going.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Required input file or path is missing or unusable.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Directory bind or search failed.
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// A name has no local uid/gid.
    #[error("Identity resolution failed for '{name}': {message}")]
    IdentityResolution { name: String, message: String },

    /// The identity backend did not answer (NSS error, timeout).
    #[error("Identity lookup failed for '{name}': {message}")]
    IdentityLookup { name: String, message: String },

    /// Creating or repairing a directory failed.
    #[error("Materialization failed at {}: {message}", path.display())]
    Materialization {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Reading, locking, archiving or replacing the cache file failed.
    #[error("Cache error at {}: {message}", path.display())]
    Cache {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was interrupted by a signal.
    #[error("Interrupted before {stage}")]
    Interrupted { stage: String },
}

impl SyncError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an identity resolution error.
    pub fn identity(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IdentityResolution {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an identity lookup error.
    pub fn identity_lookup(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IdentityLookup {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a materialization error carrying the offending path.
    pub fn materialization(
        path: &Path,
        message: impl Into<String>,
        source: Option<std::io::Error>,
    ) -> Self {
        Self::Materialization {
            path: path.to_path_buf(),
            message: message.into(),
            source,
        }
    }

    /// Create a cache error carrying the cache path.
    pub fn cache(path: &Path, message: impl Into<String>, source: Option<std::io::Error>) -> Self {
        Self::Cache {
            path: path.to_path_buf(),
            message: message.into(),
            source,
        }
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Configuration { .. } => "CONFIGURATION_ERROR",
            SyncError::Directory(_) => "DIRECTORY_QUERY_ERROR",
            SyncError::IdentityResolution { .. } => "IDENTITY_RESOLUTION_ERROR",
            SyncError::IdentityLookup { .. } => "IDENTITY_LOOKUP_ERROR",
            SyncError::Materialization { .. } => "MATERIALIZATION_ERROR",
            SyncError::Cache { .. } => "CACHE_ERROR",
            SyncError::Serialization(_) => "SERIALIZATION_ERROR",
            SyncError::Interrupted { .. } => "INTERRUPTED",
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
