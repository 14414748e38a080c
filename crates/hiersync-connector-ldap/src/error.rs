//! Directory client error types
//!
//! Bind failures are kept distinct from search failures so callers can
//! tell "the directory refused us" apart from "the directory had nothing".

use thiserror::Error;

/// Error that can occur while talking to the directory service.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Client configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Failed to open a connection to the directory server.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The server rejected the bind credentials (LDAP result code 49).
    #[error("authentication failed: invalid credentials for {bind_user}")]
    AuthenticationFailed { bind_user: String },

    /// Bind completed with a non-success result code other than 49.
    #[error("bind failed with code {code}: {message}")]
    BindFailed { code: u32, message: String },

    /// Search request failed or returned a non-success result code.
    #[error("search failed: {message}")]
    SearchFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A directory call did not complete within its deadline.
    #[error("{operation} timed out after {timeout_secs} seconds")]
    Timeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    /// The client was used after `close()`.
    #[error("directory client has been closed")]
    Closed,
}

impl DirectoryError {
    /// Whether this error happened while establishing the session
    /// (connect or bind) rather than while searching.
    pub fn is_bind_failure(&self) -> bool {
        matches!(
            self,
            DirectoryError::ConnectionFailed { .. }
                | DirectoryError::AuthenticationFailed { .. }
                | DirectoryError::BindFailed { .. }
                | DirectoryError::Timeout {
                    operation: "connect" | "bind",
                    ..
                }
        )
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::ConnectionFailed { .. } | DirectoryError::Timeout { .. }
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            DirectoryError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            DirectoryError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            DirectoryError::AuthenticationFailed { .. } => "AUTH_FAILED",
            DirectoryError::BindFailed { .. } => "BIND_FAILED",
            DirectoryError::SearchFailed { .. } => "SEARCH_FAILED",
            DirectoryError::Timeout { .. } => "TIMEOUT",
            DirectoryError::Closed => "CLIENT_CLOSED",
        }
    }

    // Convenience constructors

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        DirectoryError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a search failed error.
    pub fn search_failed(message: impl Into<String>) -> Self {
        DirectoryError::SearchFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a search failed error with source.
    pub fn search_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::SearchFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;
