//! # Secret Store
//!
//! Abstract interface over a versioned secret store with staging labels.
//!
//! The contract mirrors the Secrets Manager operations the rotation state
//! machine needs: describe (stage map), get, put, and stage moves. Writes
//! are idempotent when retried with the same version id, and stage moves
//! are atomic per version id - the only safety mechanism available to
//! concurrently retried steps, since no external lock exists.

use std::collections::{HashMap, HashSet};
use std::error::Error;

use async_trait::async_trait;

pub mod aws;
pub mod memory;

pub use aws::AwsSecretsManagerStore;
pub use memory::MemoryStore;

/// Stage label of the active credential version.
pub const STAGE_CURRENT: &str = "AWSCURRENT";
/// Stage label of the in-rotation candidate version.
pub const STAGE_PENDING: &str = "AWSPENDING";
/// Stage label of the previously active version.
pub const STAGE_PREVIOUS: &str = "AWSPREVIOUS";

/// All possible error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The secret, version, or stage does not exist
    #[error("the secret store can't find the specified secret, version, or stage")]
    NotFound,

    /// A conflicting version/stage combination already exists
    #[error("a conflicting secret version already exists for this request")]
    ResourceExists,

    /// An unexpected error occurred; treated as transient and left to the
    /// external scheduler to retry
    #[error("unhandled store error: {0}")]
    Unhandled(#[source] Box<dyn Error + Send + Sync + 'static>),
}

impl StoreError {
    pub(crate) fn unhandled(message: impl Into<String>) -> Self {
        Self::Unhandled(message.into().into())
    }
}

/// Secret metadata returned by [`SecretStore::describe_secret`].
#[derive(Debug, Clone, Default)]
pub struct SecretMetadata {
    pub rotation_enabled: Option<bool>,
    /// Version id to the set of stage labels attached to it.
    pub versions: HashMap<String, HashSet<String>>,
    /// Resource tags, used to locate the primary instance of an
    /// RDS-managed master secret.
    pub tags: HashMap<String, String>,
}

impl SecretMetadata {
    pub fn stages_of(&self, version_id: &str) -> Option<&HashSet<String>> {
        self.versions.get(version_id)
    }

    /// The version currently carrying the given stage label, if any.
    pub fn version_with_stage(&self, stage: &str) -> Option<&str> {
        self.versions
            .iter()
            .find(|(_, stages)| stages.contains(stage))
            .map(|(version_id, _)| version_id.as_str())
    }
}

/// Which secret version to read.
#[derive(Debug, Clone, Copy)]
pub enum VersionSelector<'a> {
    /// Whatever version carries this stage label.
    Stage(&'a str),
    /// A specific version id, which must also carry the stage label. Used
    /// when a step must validate the version it was invoked for.
    StagedVersion { version_id: &'a str, stage: &'a str },
}

/// Parameters for password generation, loaded from the environment by
/// [`crate::config::HandlerConfig`].
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub length: u32,
    pub exclude_characters: String,
    pub exclude_numbers: bool,
    pub exclude_punctuation: bool,
    pub exclude_uppercase: bool,
    pub exclude_lowercase: bool,
    pub require_each_included_type: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: 32,
            exclude_characters: r#":/@"'\"#.to_string(),
            exclude_numbers: false,
            exclude_punctuation: false,
            exclude_uppercase: false,
            exclude_lowercase: false,
            require_each_included_type: true,
        }
    }
}

/// SecretStore trait
/// Any struct that implements this trait can back the rotation coordinator.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch rotation metadata: stage map, rotation flag, and tags.
    async fn describe_secret(&self, secret_id: &str) -> Result<SecretMetadata, StoreError>;

    /// Read a secret string by stage, optionally pinned to a version id.
    async fn get_secret_value(
        &self,
        secret_id: &str,
        selector: VersionSelector<'_>,
    ) -> Result<String, StoreError>;

    /// Write a new secret version. Idempotent: retrying with the same
    /// version id and contents succeeds without creating a duplicate;
    /// the same version id with different contents is a conflict.
    async fn put_secret_value(
        &self,
        secret_id: &str,
        version_id: &str,
        secret_string: &str,
        stages: &[&str],
    ) -> Result<(), StoreError>;

    /// Move a stage label between versions in one atomic operation.
    async fn update_secret_version_stage(
        &self,
        secret_id: &str,
        stage: &str,
        move_to_version: Option<&str>,
        remove_from_version: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Generate a candidate password honoring the policy.
    async fn random_password(&self, policy: &PasswordPolicy) -> Result<String, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_with_stage() {
        let mut metadata = SecretMetadata::default();
        metadata.versions.insert(
            "v1".to_string(),
            HashSet::from([STAGE_CURRENT.to_string()]),
        );
        metadata.versions.insert(
            "v2".to_string(),
            HashSet::from([STAGE_PENDING.to_string()]),
        );

        assert_eq!(metadata.version_with_stage(STAGE_CURRENT), Some("v1"));
        assert_eq!(metadata.version_with_stage(STAGE_PENDING), Some("v2"));
        assert_eq!(metadata.version_with_stage(STAGE_PREVIOUS), None);
    }

    #[test]
    fn test_password_policy_defaults() {
        let policy = PasswordPolicy::default();
        assert_eq!(policy.length, 32);
        assert_eq!(policy.exclude_characters, r#":/@"'\"#);
        assert!(policy.require_each_included_type);
        assert!(!policy.exclude_numbers);
    }
}
