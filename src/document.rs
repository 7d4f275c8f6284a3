//! # Secret Document
//!
//! The JSON credential document stored in each secret version.
//!
//! Expected shape:
//!
//! ```json
//! {
//!     "engine": "postgres",
//!     "host": "instance host name",
//!     "username": "app_user",
//!     "password": "...",
//!     "dbname": "postgres",
//!     "port": 5432,
//!     "masterarn": "arn of the master secret used to change passwords"
//! }
//! ```
//!
//! `dbname` and `port` are optional and default to `postgres`/`5432`. An
//! RDS-managed master secret may contain only `username` and `password`;
//! its connection parameters are then resolved from the RDS API (see the
//! `topology` module). Unknown keys are preserved so that copying the
//! current document into a new version never drops fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zeroize::Zeroize;

use crate::error::RotationError;

/// Engines this handler can rotate.
pub const SUPPORTED_ENGINES: &[&str] = &["postgres", "aurora-postgresql"];

/// Suffix that marks the secondary identity of the alternating user pair.
pub const CLONE_SUFFIX: &str = "_clone";

/// PostgreSQL identifier length limit.
const MAX_USERNAME_LENGTH: usize = 63;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_DBNAME: &str = "postgres";

/// Credential document held by a secret version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretDocument {
    /// Database engine. Required for connectable documents, absent on
    /// RDS-managed master secrets until resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Instance host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,
    /// Accepts both a JSON number and a numeric string.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_port"
    )]
    pub port: Option<u16>,
    /// ARN of the master secret used to create users and change passwords.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masterarn: Option<String>,
    /// TLS preference; bool or the strings "true"/"false". See [`SslConfig`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<Value>,
    /// Keys we do not interpret but must carry across versions.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Drop for SecretDocument {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// TLS connectivity derived from the document's `ssl` key.
///
/// - key absent or an unrecognized value: require TLS, fall back to a
///   non-TLS-required attempt if the TLS attempt fails
/// - key is a bool, or "true"/"false" ignoring case: honor it, no fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SslConfig {
    pub use_ssl: bool,
    pub fall_back: bool,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            use_ssl: true,
            fall_back: true,
        }
    }
}

impl SecretDocument {
    /// Parse a secret string into a document.
    pub fn parse(secret_string: &str) -> Result<Self, RotationError> {
        serde_json::from_str(secret_string)
            .map_err(|e| RotationError::config(format!("secret is not a valid credential document: {e}")))
    }

    /// Serialize the document back into a secret string.
    pub fn to_secret_string(&self) -> Result<String, RotationError> {
        serde_json::to_string(self)
            .map_err(|e| RotationError::config(format!("unable to serialize credential document: {e}")))
    }

    /// Check the fields a database connection needs.
    pub fn validate(&self) -> Result<(), RotationError> {
        let engine = self
            .engine
            .as_deref()
            .ok_or_else(|| RotationError::config("engine key is missing from secret JSON"))?;
        if !SUPPORTED_ENGINES.contains(&engine) {
            return Err(RotationError::config(format!(
                "database engine must be one of {SUPPORTED_ENGINES:?}, got '{engine}'"
            )));
        }
        if self.host.is_none() {
            return Err(RotationError::config("host key is missing from secret JSON"));
        }
        Ok(())
    }

    /// An RDS-managed master secret carries only `username` and `password`;
    /// its connection parameters live in the RDS API.
    pub fn is_bare_credentials(&self) -> bool {
        self.engine.is_none()
            && self.host.is_none()
            && self.dbname.is_none()
            && self.port.is_none()
            && self.masterarn.is_none()
            && self.ssl.is_none()
            && self.extra.is_empty()
    }

    /// Host, with the document validated first by the caller.
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn dbname(&self) -> &str {
        self.dbname.as_deref().unwrap_or(DEFAULT_DBNAME)
    }

    pub fn ssl_config(&self) -> SslConfig {
        match &self.ssl {
            None => SslConfig::default(),
            Some(Value::Bool(use_ssl)) => SslConfig {
                use_ssl: *use_ssl,
                fall_back: false,
            },
            Some(Value::String(text)) => match text.to_lowercase().as_str() {
                "true" => SslConfig {
                    use_ssl: true,
                    fall_back: false,
                },
                "false" => SslConfig {
                    use_ssl: false,
                    fall_back: false,
                },
                _ => SslConfig::default(),
            },
            Some(_) => SslConfig::default(),
        }
    }

    /// The other member of the alternating user pair for this document's
    /// username.
    pub fn alternate_username(&self) -> Result<String, RotationError> {
        alternate_username(&self.username)
    }

    /// Which member of the alternating pair this document's username is.
    pub fn rotation_user(&self) -> RotationUser {
        RotationUser::of(&self.username)
    }
}

/// The two identities of the alternating user pair.
///
/// The member NOT currently referenced by `AWSCURRENT` receives the new
/// password during rotation, so the active credential stays valid until
/// the new one is confirmed working.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationUser {
    Primary,
    Secondary,
}

impl RotationUser {
    pub fn of(username: &str) -> Self {
        if username.ends_with(CLONE_SUFFIX) {
            Self::Secondary
        } else {
            Self::Primary
        }
    }

    pub fn alternate(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }
}

/// Toggle a username between the primary and secondary identity.
pub fn alternate_username(current_username: &str) -> Result<String, RotationError> {
    if let Some(primary) = current_username.strip_suffix(CLONE_SUFFIX) {
        return Ok(primary.to_string());
    }
    let alternate = format!("{current_username}{CLONE_SUFFIX}");
    if alternate.len() > MAX_USERNAME_LENGTH {
        return Err(RotationError::config(format!(
            "unable to clone user, username length with {CLONE_SUFFIX} appended would exceed {MAX_USERNAME_LENGTH} characters"
        )));
    }
    Ok(alternate)
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match Option::<PortRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PortRepr::Number(port)) => Ok(Some(port)),
        Some(PortRepr::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port value '{text}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_document() -> &'static str {
        r#"{
            "engine": "postgres",
            "host": "db.internal.example.com",
            "username": "app_user",
            "password": "hunter2",
            "dbname": "app",
            "port": 5432,
            "masterarn": "arn:aws:secretsmanager:eu-west-2:123456789012:secret:master-abc123"
        }"#
    }

    #[test]
    fn test_parse_full_document() {
        let doc = SecretDocument::parse(full_document()).unwrap();
        assert_eq!(doc.engine.as_deref(), Some("postgres"));
        assert_eq!(doc.host(), "db.internal.example.com");
        assert_eq!(doc.username, "app_user");
        assert_eq!(doc.port(), 5432);
        assert_eq!(doc.dbname(), "app");
        assert!(doc.validate().is_ok());
        assert!(!doc.is_bare_credentials());
    }

    #[test]
    fn test_port_accepts_numeric_string() {
        let doc = SecretDocument::parse(
            r#"{"engine":"postgres","host":"h","username":"u","password":"p","port":"6432"}"#,
        )
        .unwrap();
        assert_eq!(doc.port(), 6432);
    }

    #[test]
    fn test_defaults_applied() {
        let doc = SecretDocument::parse(
            r#"{"engine":"postgres","host":"h","username":"u","password":"p"}"#,
        )
        .unwrap();
        assert_eq!(doc.port(), 5432);
        assert_eq!(doc.dbname(), "postgres");
    }

    #[test]
    fn test_missing_host_fails_validation() {
        let doc =
            SecretDocument::parse(r#"{"engine":"postgres","username":"u","password":"p"}"#).unwrap();
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_unsupported_engine_rejected() {
        let doc = SecretDocument::parse(
            r#"{"engine":"mysql","host":"h","username":"u","password":"p"}"#,
        )
        .unwrap();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_bare_master_secret_detected() {
        let doc = SecretDocument::parse(r#"{"username":"postgres","password":"p"}"#).unwrap();
        assert!(doc.is_bare_credentials());
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let doc = SecretDocument::parse(
            r#"{"engine":"postgres","host":"h","username":"u","password":"p","team":"payments"}"#,
        )
        .unwrap();
        let rendered = doc.to_secret_string().unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(reparsed["team"], "payments");
    }

    #[test]
    fn test_alternate_username_toggles_both_ways() {
        assert_eq!(alternate_username("app_user").unwrap(), "app_user_clone");
        assert_eq!(alternate_username("app_user_clone").unwrap(), "app_user");
    }

    #[test]
    fn test_alternate_username_length_limit() {
        let long_name = "a".repeat(60);
        assert!(alternate_username(&long_name).is_err());
        // 57 + 6 = 63 is still within the identifier limit
        let max_name = "a".repeat(57);
        assert!(alternate_username(&max_name).is_ok());
    }

    #[test]
    fn test_rotation_user_classification() {
        assert_eq!(RotationUser::of("app_user"), RotationUser::Primary);
        assert_eq!(RotationUser::of("app_user_clone"), RotationUser::Secondary);
        assert_eq!(RotationUser::Primary.alternate(), RotationUser::Secondary);
    }

    #[test]
    fn test_ssl_defaults_when_absent() {
        let doc = SecretDocument::parse(
            r#"{"engine":"postgres","host":"h","username":"u","password":"p"}"#,
        )
        .unwrap();
        assert_eq!(doc.ssl_config(), SslConfig { use_ssl: true, fall_back: true });
    }

    #[test]
    fn test_ssl_bool_disables_fallback() {
        let doc = SecretDocument::parse(
            r#"{"engine":"postgres","host":"h","username":"u","password":"p","ssl":false}"#,
        )
        .unwrap();
        assert_eq!(doc.ssl_config(), SslConfig { use_ssl: false, fall_back: false });
    }

    #[test]
    fn test_ssl_string_values() {
        let doc = SecretDocument::parse(
            r#"{"engine":"postgres","host":"h","username":"u","password":"p","ssl":"TRUE"}"#,
        )
        .unwrap();
        assert_eq!(doc.ssl_config(), SslConfig { use_ssl: true, fall_back: false });

        let doc = SecretDocument::parse(
            r#"{"engine":"postgres","host":"h","username":"u","password":"p","ssl":"nonsense"}"#,
        )
        .unwrap();
        assert_eq!(doc.ssl_config(), SslConfig::default());
    }
}
