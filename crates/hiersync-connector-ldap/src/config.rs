//! Directory client configuration
//!
//! Connection and bind settings for the directory service. Field names are
//! snake_case; the camelCase spellings used by older deployment documents
//! (`serverAddress`, `bindUser`, ...) are accepted as aliases.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};

/// Timeouts applied to every directory call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Deadline for TCP connect and TLS handshake, in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Deadline for each bind or search request, in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_operation_timeout() -> u64 {
    60
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl ConnectionSettings {
    /// Get connection timeout as Duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get per-operation timeout as Duration.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// Configuration for the LDAP directory client.
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Server hostname, IP address, or a full `ldap://` / `ldaps://` URL.
    #[serde(alias = "serverAddress")]
    pub server_address: String,

    /// Server port, used when `server_address` is not a URL.
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on plain LDAP connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Bind principal (DN or `user@domain`).
    #[serde(alias = "bindUser")]
    pub bind_user: String,

    /// Bind credential.
    #[serde(default, alias = "bindPassword", skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Base DN every search is rooted at.
    #[serde(alias = "searchBase")]
    pub search_base: String,

    /// Connection timeouts.
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("server_address", &self.server_address)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("bind_user", &self.bind_user)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("search_base", &self.search_base)
            .field("connection", &self.connection)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

impl DirectoryConfig {
    /// Create a new config with required fields.
    pub fn new(
        server_address: impl Into<String>,
        search_base: impl Into<String>,
        bind_user: impl Into<String>,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            bind_user: bind_user.into(),
            bind_password: None,
            search_base: search_base.into(),
            connection: ConnectionSettings::default(),
        }
    }

    /// Set bind password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    /// Enable STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    /// Override connection timeouts.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    /// Get the LDAP URL.
    ///
    /// A `server_address` that already carries a scheme is used verbatim.
    #[must_use]
    pub fn url(&self) -> String {
        if self.server_address.contains("://") {
            return self.server_address.clone();
        }
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.server_address, self.port)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.server_address.trim().is_empty() {
            return Err(DirectoryError::invalid_configuration(
                "server_address is required",
            ));
        }

        if let Some((scheme, _)) = self.server_address.split_once("://") {
            if scheme != "ldap" && scheme != "ldaps" {
                return Err(DirectoryError::invalid_configuration(format!(
                    "unsupported URL scheme '{scheme}', expected ldap or ldaps"
                )));
            }
        }

        if self.search_base.trim().is_empty() {
            return Err(DirectoryError::invalid_configuration(
                "search_base is required",
            ));
        }

        if self.bind_user.trim().is_empty() {
            return Err(DirectoryError::invalid_configuration("bind_user is required"));
        }

        if self.use_ssl && self.use_starttls {
            return Err(DirectoryError::invalid_configuration(
                "cannot use both SSL and STARTTLS",
            ));
        }

        if self.connection.connection_timeout_secs == 0
            || self.connection.operation_timeout_secs == 0
        {
            return Err(DirectoryError::invalid_configuration(
                "timeouts must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Create a redacted copy (for logging/display).
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.bind_password.is_some() {
            config.bind_password = Some("***REDACTED***".to_string());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DirectoryConfig {
        DirectoryConfig::new(
            "ad.example.org",
            "DC=example,DC=org",
            "CN=svc-sync,OU=Service,DC=example,DC=org",
        )
    }

    #[test]
    fn test_config_new() {
        let config = base_config().with_password("secret");

        assert_eq!(config.server_address, "ad.example.org");
        assert_eq!(config.port, 389);
        assert_eq!(config.search_base, "DC=example,DC=org");
        assert_eq!(config.bind_password, Some("secret".to_string()));
    }

    #[test]
    fn test_config_url() {
        let config = base_config();
        assert_eq!(config.url(), "ldap://ad.example.org:389");

        let ssl_config = config.with_ssl();
        assert_eq!(ssl_config.url(), "ldaps://ad.example.org:636");

        let mut explicit = base_config();
        explicit.server_address = "ldaps://dc01.example.org:3269".to_string();
        assert_eq!(explicit.url(), "ldaps://dc01.example.org:3269");
    }

    #[test]
    fn test_config_validation() {
        assert!(base_config().validate().is_ok());

        let mut empty_host = base_config();
        empty_host.server_address = "  ".to_string();
        assert!(empty_host.validate().is_err());

        let mut bad_scheme = base_config();
        bad_scheme.server_address = "http://ad.example.org".to_string();
        assert!(bad_scheme.validate().is_err());

        let both_tls = base_config().with_ssl().with_starttls();
        assert!(both_tls.validate().is_err());

        let zero_timeout = base_config().with_connection(ConnectionSettings {
            connection_timeout_secs: 0,
            operation_timeout_secs: 10,
        });
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_config_redacted() {
        let config = base_config().with_password("super-secret");

        let redacted = config.redacted();
        assert_eq!(redacted.bind_password, Some("***REDACTED***".to_string()));
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn test_config_accepts_camel_case_aliases() {
        let yaml = r#"
serverAddress: ad.example.org
bindUser: svc-sync@example.org
bindPassword: hunter2
searchBase: DC=example,DC=org
"#;
        let config: DirectoryConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.server_address, "ad.example.org");
        assert_eq!(config.bind_user, "svc-sync@example.org");
        assert_eq!(config.bind_password.as_deref(), Some("hunter2"));
        assert_eq!(config.connection.operation_timeout_secs, 60);
    }

    #[test]
    fn test_config_serialization_skips_missing_password() {
        let json = serde_json::to_string(&base_config()).unwrap();
        assert!(!json.contains("bind_password"));

        let parsed: DirectoryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.bind_user, "CN=svc-sync,OU=Service,DC=example,DC=org");
    }
}
