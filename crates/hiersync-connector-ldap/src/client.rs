//! LDAP directory client
//!
//! One bind per client, reused for every search of a run. All network calls
//! run under the deadlines from [`ConnectionSettings`](crate::config::ConnectionSettings).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::DirectoryConfig;
use crate::entry::DirectoryEntry;
use crate::error::{DirectoryError, DirectoryResult};

/// Search capability of a directory service.
///
/// Zero matching entries is `Ok(vec![])`; bind and transport failures are
/// errors.
#[async_trait]
pub trait DirectoryQuery: Send + Sync {
    /// Run a subtree search under the configured search base.
    async fn search(&self, filter: &str, attributes: &[&str])
        -> DirectoryResult<Vec<DirectoryEntry>>;
}

/// Directory client backed by `ldap3`.
pub struct LdapDirectoryClient {
    /// Configuration.
    config: DirectoryConfig,

    /// Cached bound connection (lazily initialized).
    connection: Arc<RwLock<Option<Ldap>>>,

    /// Whether the client has been closed.
    closed: Arc<RwLock<bool>>,
}

impl LdapDirectoryClient {
    /// Create a new client with the given configuration.
    pub fn new(config: DirectoryConfig) -> DirectoryResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            closed: Arc::new(RwLock::new(false)),
        })
    }

    /// Configuration this client was built with.
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Get a bound connection, creating one if necessary.
    async fn get_connection(&self) -> DirectoryResult<Ldap> {
        if *self.closed.read().await {
            return Err(DirectoryError::Closed);
        }

        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let conn = self.create_connection().await?;

        {
            let mut conn_guard = self.connection.write().await;
            *conn_guard = Some(conn.clone());
        }

        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects.
    async fn invalidate_connection(&self) {
        let mut conn_guard = self.connection.write().await;
        *conn_guard = None;
    }

    /// Connect and bind.
    async fn create_connection(&self) -> DirectoryResult<Ldap> {
        let url = self.config.url();
        let connect_timeout = self.config.connection.connection_timeout();

        debug!(url = %url, "Connecting to directory server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(connect_timeout)
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = with_deadline(
            "connect",
            connect_timeout,
            LdapConnAsync::with_settings(settings, &url),
        )
        .await?
        .map_err(|e| {
            DirectoryError::connection_failed_with_source(
                format!("Failed to connect to directory server at {}", url),
                e,
            )
        })?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let bind_user = &self.config.bind_user;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_user = %bind_user, "Performing LDAP bind");

        let result = with_deadline(
            "bind",
            self.config.connection.operation_timeout(),
            ldap.simple_bind(bind_user, bind_password),
        )
        .await?
        .map_err(|e| {
            DirectoryError::connection_failed_with_source(
                format!("LDAP bind failed for {}", bind_user),
                e,
            )
        })?;

        if result.rc != 0 {
            if result.rc == 49 {
                return Err(DirectoryError::AuthenticationFailed {
                    bind_user: bind_user.clone(),
                });
            }
            return Err(DirectoryError::BindFailed {
                code: result.rc,
                message: result.text,
            });
        }

        info!(url = %url, "Directory connection established");

        Ok(ldap)
    }

    /// Check that the search base is reachable with the configured bind.
    #[instrument(skip(self))]
    pub async fn test_connection(&self) -> DirectoryResult<()> {
        let mut ldap = self.get_connection().await?;

        let result = with_deadline(
            "search",
            self.config.connection.operation_timeout(),
            ldap.search(
                &self.config.search_base,
                Scope::Base,
                "(objectClass=*)",
                vec!["dn"],
            ),
        )
        .await?
        .map_err(|e| DirectoryError::search_failed_with_source("Test search failed", e))?;

        let (entries, _res) = result
            .success()
            .map_err(|e| DirectoryError::search_failed_with_source("Test search failed", e))?;

        if entries.is_empty() {
            return Err(DirectoryError::search_failed(format!(
                "Search base '{}' not found or not accessible",
                self.config.search_base
            )));
        }

        info!("Directory connection test successful");
        Ok(())
    }

    /// Unbind and release the connection. Further searches fail with
    /// [`DirectoryError::Closed`].
    pub async fn close(&self) {
        *self.closed.write().await = true;

        let mut conn_guard = self.connection.write().await;
        if let Some(mut ldap) = conn_guard.take() {
            if let Err(e) = ldap.unbind().await {
                warn!(error = %e, "Error during LDAP unbind");
            }
        }
    }
}

#[async_trait]
impl DirectoryQuery for LdapDirectoryClient {
    #[instrument(skip(self, attributes))]
    async fn search(
        &self,
        filter: &str,
        attributes: &[&str],
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let mut ldap = self.get_connection().await?;

        debug!(
            filter = %filter,
            search_base = %self.config.search_base,
            "Searching directory"
        );

        let response = with_deadline(
            "search",
            self.config.connection.operation_timeout(),
            ldap.search(
                &self.config.search_base,
                Scope::Subtree,
                filter,
                attributes.to_vec(),
            ),
        )
        .await;

        let result = match response {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.invalidate_connection().await;
                return Err(DirectoryError::search_failed_with_source(
                    "LDAP search failed",
                    e,
                ));
            }
            Err(e) => {
                self.invalidate_connection().await;
                return Err(e);
            }
        };

        let (entries, _) = result
            .success()
            .map_err(|e| DirectoryError::search_failed_with_source("LDAP search failed", e))?;

        // Referrals and intermediate messages carry no entry data.
        let records: Vec<DirectoryEntry> = entries
            .into_iter()
            .filter(|e| !e.is_ref() && !e.is_intermediate())
            .map(SearchEntry::construct)
            .map(DirectoryEntry::from)
            .collect();

        debug!(returned = records.len(), "Directory search completed");

        Ok(records)
    }
}

impl std::fmt::Debug for LdapDirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectoryClient")
            .field("config", &self.config.redacted())
            .finish()
    }
}

/// Await `fut`, failing with [`DirectoryError::Timeout`] once `limit` elapses.
async fn with_deadline<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = T>,
) -> DirectoryResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DirectoryError::Timeout {
            operation,
            timeout_secs: limit.as_secs(),
        })
}
