//! Common test utilities for the rotation step-machine tests
//!
//! Provides a scriptable in-memory database standing in for PostgreSQL,
//! plus fixtures seeding the in-memory secret store with an application
//! secret, its master secret, and a live user pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secret_rotation_handler::{
    DatabaseCredentialManager, DatabaseError, HandlerConfig, MemoryStore, RotationCoordinator,
    SecretDocument, SecretStore,
};

pub const APP_SECRET_ARN: &str =
    "arn:aws:secretsmanager:eu-west-2:123456789012:secret:app-db-abc123";
pub const MASTER_SECRET_ARN: &str =
    "arn:aws:secretsmanager:eu-west-2:123456789012:secret:master-db-def456";
pub const DB_HOST: &str = "appdb.abc123.eu-west-2.rds.amazonaws.com";

#[derive(Debug, Default)]
struct FakeDatabaseState {
    /// username -> live password
    passwords: HashMap<String, String>,
    /// (granted role, grantee) pairs recorded on role creation
    grants: Vec<(String, String)>,
    reachable: bool,
    denied_user: Option<String>,
}

/// In-memory stand-in for the live database. Authentication succeeds when
/// the document's password matches the stored one, the host is reachable,
/// and the user is not explicitly denied.
#[derive(Debug, Default)]
pub struct FakeDatabase {
    state: Mutex<FakeDatabaseState>,
}

impl FakeDatabase {
    pub fn with_users(users: &[(&str, &str)]) -> Self {
        Self {
            state: Mutex::new(FakeDatabaseState {
                passwords: users
                    .iter()
                    .map(|(username, password)| ((*username).to_string(), (*password).to_string()))
                    .collect(),
                grants: Vec::new(),
                reachable: true,
                denied_user: None,
            }),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    /// Make authentication fail for one user, regardless of password.
    pub fn deny_user(&self, username: &str) {
        self.state.lock().unwrap().denied_user = Some(username.to_string());
    }

    pub fn live_password(&self, username: &str) -> Option<String> {
        self.state.lock().unwrap().passwords.get(username).cloned()
    }

    pub fn grants(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().grants.clone()
    }
}

fn connection_error(document: &SecretDocument, reason: &str) -> DatabaseError {
    DatabaseError::Connection {
        host: document.host().to_string(),
        username: document.username.clone(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl DatabaseCredentialManager for FakeDatabase {
    async fn verify_login(&self, document: &SecretDocument) -> Result<(), DatabaseError> {
        let state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(connection_error(document, "connection refused"));
        }
        if state.denied_user.as_deref() == Some(document.username.as_str()) {
            return Err(connection_error(document, "password authentication failed"));
        }
        match state.passwords.get(&document.username) {
            Some(password) if *password == document.password => Ok(()),
            _ => Err(connection_error(document, "password authentication failed")),
        }
    }

    async fn apply_password(
        &self,
        admin: &SecretDocument,
        current_username: &str,
        pending_username: &str,
        password: &str,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(connection_error(admin, "connection refused"));
        }
        match state.passwords.get(&admin.username) {
            Some(admin_password) if *admin_password == admin.password => {}
            _ => return Err(connection_error(admin, "password authentication failed")),
        }

        if !state.passwords.contains_key(pending_username) {
            state
                .grants
                .push((current_username.to_string(), pending_username.to_string()));
        }
        state
            .passwords
            .insert(pending_username.to_string(), password.to_string());
        Ok(())
    }
}

/// Application secret document as stored in a secret version.
pub fn app_document(username: &str, password: &str) -> String {
    serde_json::json!({
        "engine": "postgres",
        "host": DB_HOST,
        "username": username,
        "password": password,
        "dbname": "app",
        "port": 5432,
        "masterarn": MASTER_SECRET_ARN,
    })
    .to_string()
}

/// Master secret document with full connection parameters.
pub fn master_document() -> String {
    serde_json::json!({
        "engine": "postgres",
        "host": DB_HOST,
        "username": "postgres",
        "password": "admin-password",
    })
    .to_string()
}

/// Store seeded with the application and master secrets, a database that
/// knows the live user pair, and a coordinator wired over both.
pub fn rotation_fixture() -> (Arc<MemoryStore>, Arc<FakeDatabase>, RotationCoordinator) {
    let store = Arc::new(MemoryStore::new());
    store.seed_secret(APP_SECRET_ARN, "v1", &app_document("app_user", "old-password"));
    store.seed_secret(MASTER_SECRET_ARN, "m1", &master_document());

    let database = Arc::new(FakeDatabase::with_users(&[
        ("app_user", "old-password"),
        ("postgres", "admin-password"),
    ]));

    let store_handle: Arc<dyn SecretStore> = store.clone();
    let database_handle: Arc<dyn DatabaseCredentialManager> = database.clone();
    let coordinator =
        RotationCoordinator::new(store_handle, database_handle, HandlerConfig::default());

    (store, database, coordinator)
}
