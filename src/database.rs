//! # Database Credential Manager
//!
//! Creates, validates, and updates database passwords over short-lived
//! PostgreSQL connections. Connections never outlive a single rotation
//! step.
//!
//! Password changes are always issued through the master/admin
//! credentials, never through the credential being rotated. Login
//! verification is a real authenticated round trip (`SELECT NOW()`), not
//! a syntactic check.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{ConnectOptions, Connection, PgConnection};
use tracing::{debug, info};

use crate::document::SecretDocument;

/// Database failure modes.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Connection or authentication failure.
    #[error("unable to connect to PostgreSQL host '{host}' as user '{username}': {reason}")]
    Connection {
        host: String,
        username: String,
        reason: String,
    },

    /// A statement failed on an established connection.
    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Credential operations the rotation coordinator needs from a database.
#[async_trait]
pub trait DatabaseCredentialManager: Send + Sync {
    /// Authenticate with the document's credentials and complete a round
    /// trip.
    async fn verify_login(&self, document: &SecretDocument) -> Result<(), DatabaseError>;

    /// Connect with the admin credentials and set the pending user's
    /// password, creating the role (with the current user's grants) if it
    /// does not exist yet.
    async fn apply_password(
        &self,
        admin: &SecretDocument,
        current_username: &str,
        pending_username: &str,
        password: &str,
    ) -> Result<(), DatabaseError>;
}

/// PostgreSQL implementation over sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresCredentialManager;

impl PostgresCredentialManager {
    pub fn new() -> Self {
        Self
    }

    async fn attempt(
        document: &SecretDocument,
        ssl_mode: PgSslMode,
    ) -> Result<PgConnection, DatabaseError> {
        let options = PgConnectOptions::new()
            .host(document.host())
            .port(document.port())
            .database(document.dbname())
            .username(&document.username)
            .password(&document.password)
            .ssl_mode(ssl_mode);

        match options.connect().await {
            Ok(connection) => {
                debug!(
                    host = document.host(),
                    username = %document.username,
                    ?ssl_mode,
                    "established PostgreSQL connection"
                );
                Ok(connection)
            }
            Err(source) => Err(DatabaseError::Connection {
                host: document.host().to_string(),
                username: document.username.clone(),
                reason: source.to_string(),
            }),
        }
    }

    /// Connect honoring the document's SSL preference, falling back to a
    /// non-TLS-required attempt when the document allows it.
    async fn connect(document: &SecretDocument) -> Result<PgConnection, DatabaseError> {
        let ssl = document.ssl_config();
        let first_mode = if ssl.use_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };
        match Self::attempt(document, first_mode).await {
            Ok(connection) => Ok(connection),
            Err(_) if ssl.fall_back => Self::attempt(document, PgSslMode::Prefer).await,
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl DatabaseCredentialManager for PostgresCredentialManager {
    async fn verify_login(&self, document: &SecretDocument) -> Result<(), DatabaseError> {
        let mut connection = Self::connect(document).await?;
        sqlx::query("SELECT NOW()").fetch_one(&mut connection).await?;
        connection.close().await?;
        Ok(())
    }

    async fn apply_password(
        &self,
        admin: &SecretDocument,
        current_username: &str,
        pending_username: &str,
        password: &str,
    ) -> Result<(), DatabaseError> {
        let mut connection = Self::connect(admin).await?;
        let mut tx = connection.begin().await?;

        // Escape identifiers and the password literal server-side; role
        // statements cannot take bind parameters.
        let pending_ident: String = sqlx::query_scalar("SELECT quote_ident($1)")
            .bind(pending_username)
            .fetch_one(&mut *tx)
            .await?;
        let current_ident: String = sqlx::query_scalar("SELECT quote_ident($1)")
            .bind(current_username)
            .fetch_one(&mut *tx)
            .await?;
        let password_literal: String = sqlx::query_scalar("SELECT quote_literal($1)")
            .bind(password)
            .fetch_one(&mut *tx)
            .await?;

        let role_exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM pg_roles WHERE rolname = $1")
                .bind(pending_username)
                .fetch_optional(&mut *tx)
                .await?;

        if role_exists.is_none() {
            sqlx::query(&format!(
                "CREATE ROLE {pending_ident} WITH LOGIN PASSWORD {password_literal}"
            ))
            .execute(&mut *tx)
            .await?;
            sqlx::query(&format!("GRANT {current_ident} TO {pending_ident}"))
                .execute(&mut *tx)
                .await?;
            info!(
                username = pending_username,
                "created role and granted privileges from current user"
            );
        } else {
            sqlx::query(&format!(
                "ALTER USER {pending_ident} WITH PASSWORD {password_literal}"
            ))
            .execute(&mut *tx)
            .await?;
            info!(username = pending_username, "updated role password");
        }

        tx.commit().await?;
        connection.close().await?;
        Ok(())
    }
}
