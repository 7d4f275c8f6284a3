//! # In-Memory Secret Store
//!
//! A [`SecretStore`] holding everything in process memory, reproducing the
//! staging behavior of the real service:
//!
//! - a version id can be registered before its value is written, the way
//!   the rotation service attaches `AWSPENDING` to a fresh version id
//!   before invoking the first step
//! - a stage label lives on at most one version; attaching it elsewhere
//!   detaches it first
//! - moving `AWSCURRENT` onto a version marks the vacated version
//!   `AWSPREVIOUS` and clears `AWSPENDING` from the promoted one, as the
//!   service does when a rotation completes
//!
//! Used by the integration suite and available for local dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::Rng;

use super::{PasswordPolicy, SecretMetadata, SecretStore, StoreError, VersionSelector};

const PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;
const MAX_GENERATION_ATTEMPTS: usize = 100;

#[derive(Debug, Default)]
struct VersionRecord {
    /// None until a value is written for this version id.
    secret_string: Option<String>,
    stages: HashSet<String>,
}

#[derive(Debug, Default)]
struct SecretRecord {
    rotation_enabled: bool,
    tags: HashMap<String, String>,
    versions: HashMap<String, VersionRecord>,
}

/// In-memory secret store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<String, SecretRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a secret whose given version is `AWSCURRENT`, with rotation
    /// enabled.
    pub fn seed_secret(&self, secret_id: &str, version_id: &str, secret_string: &str) {
        let mut secrets = self.secrets.lock().expect("store mutex poisoned");
        let record = secrets.entry(secret_id.to_string()).or_default();
        record.rotation_enabled = true;
        record.versions.insert(
            version_id.to_string(),
            VersionRecord {
                secret_string: Some(secret_string.to_string()),
                stages: HashSet::from([super::STAGE_CURRENT.to_string()]),
            },
        );
    }

    /// Register a fresh version id carrying `AWSPENDING` with no value yet,
    /// the way the rotation service does before invoking `createSecret`.
    pub fn begin_rotation(&self, secret_id: &str, version_id: &str) {
        let mut secrets = self.secrets.lock().expect("store mutex poisoned");
        let Some(record) = secrets.get_mut(secret_id) else {
            return;
        };
        for version in record.versions.values_mut() {
            version.stages.remove(super::STAGE_PENDING);
        }
        record.versions.insert(
            version_id.to_string(),
            VersionRecord {
                secret_string: None,
                stages: HashSet::from([super::STAGE_PENDING.to_string()]),
            },
        );
    }

    pub fn set_rotation_enabled(&self, secret_id: &str, enabled: bool) {
        let mut secrets = self.secrets.lock().expect("store mutex poisoned");
        if let Some(record) = secrets.get_mut(secret_id) {
            record.rotation_enabled = enabled;
        }
    }

    pub fn add_tag(&self, secret_id: &str, key: &str, value: &str) {
        let mut secrets = self.secrets.lock().expect("store mutex poisoned");
        if let Some(record) = secrets.get_mut(secret_id) {
            record.tags.insert(key.to_string(), value.to_string());
        }
    }

    /// Snapshot of version id to stage labels, for assertions.
    pub fn stages(&self, secret_id: &str) -> HashMap<String, HashSet<String>> {
        let secrets = self.secrets.lock().expect("store mutex poisoned");
        secrets
            .get(secret_id)
            .map(|record| {
                record
                    .versions
                    .iter()
                    .map(|(id, version)| (id.clone(), version.stages.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stored value of a specific version, for assertions.
    pub fn secret_string(&self, secret_id: &str, version_id: &str) -> Option<String> {
        let secrets = self.secrets.lock().expect("store mutex poisoned");
        secrets
            .get(secret_id)?
            .versions
            .get(version_id)?
            .secret_string
            .clone()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn describe_secret(&self, secret_id: &str) -> Result<SecretMetadata, StoreError> {
        let secrets = self.secrets.lock().expect("store mutex poisoned");
        let record = secrets.get(secret_id).ok_or(StoreError::NotFound)?;
        Ok(SecretMetadata {
            rotation_enabled: Some(record.rotation_enabled),
            versions: record
                .versions
                .iter()
                .map(|(id, version)| (id.clone(), version.stages.clone()))
                .collect(),
            tags: record.tags.clone(),
        })
    }

    async fn get_secret_value(
        &self,
        secret_id: &str,
        selector: VersionSelector<'_>,
    ) -> Result<String, StoreError> {
        let secrets = self.secrets.lock().expect("store mutex poisoned");
        let record = secrets.get(secret_id).ok_or(StoreError::NotFound)?;
        let version = match selector {
            VersionSelector::Stage(stage) => record
                .versions
                .values()
                .find(|version| version.stages.contains(stage)),
            VersionSelector::StagedVersion { version_id, stage } => record
                .versions
                .get(version_id)
                .filter(|version| version.stages.contains(stage)),
        };
        version
            .and_then(|version| version.secret_string.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn put_secret_value(
        &self,
        secret_id: &str,
        version_id: &str,
        secret_string: &str,
        stages: &[&str],
    ) -> Result<(), StoreError> {
        let mut secrets = self.secrets.lock().expect("store mutex poisoned");
        let record = secrets.get_mut(secret_id).ok_or(StoreError::NotFound)?;

        if let Some(existing) = record.versions.get(version_id) {
            match &existing.secret_string {
                // Retried write with identical contents: idempotent no-op.
                Some(value) if value == secret_string => return Ok(()),
                Some(_) => return Err(StoreError::ResourceExists),
                // Version registered by begin_rotation, value arrives now.
                None => {}
            }
        }

        for version in record.versions.values_mut() {
            for stage in stages {
                version.stages.remove(*stage);
            }
        }

        let version = record.versions.entry(version_id.to_string()).or_default();
        version.secret_string = Some(secret_string.to_string());
        version
            .stages
            .extend(stages.iter().map(|stage| (*stage).to_string()));
        Ok(())
    }

    async fn update_secret_version_stage(
        &self,
        secret_id: &str,
        stage: &str,
        move_to_version: Option<&str>,
        remove_from_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut secrets = self.secrets.lock().expect("store mutex poisoned");
        let record = secrets.get_mut(secret_id).ok_or(StoreError::NotFound)?;

        // Conditional move: the source version must still hold the stage.
        if let Some(source_id) = remove_from_version {
            let source = record.versions.get_mut(source_id).ok_or(StoreError::NotFound)?;
            if !source.stages.remove(stage) {
                return Err(StoreError::ResourceExists);
            }
            if stage == super::STAGE_CURRENT {
                for version in record.versions.values_mut() {
                    version.stages.remove(super::STAGE_PREVIOUS);
                }
                let source = record
                    .versions
                    .get_mut(source_id)
                    .ok_or(StoreError::NotFound)?;
                source.stages.insert(super::STAGE_PREVIOUS.to_string());
            }
        }

        if let Some(target_id) = move_to_version {
            let target = record.versions.get_mut(target_id).ok_or(StoreError::NotFound)?;
            target.stages.insert(stage.to_string());
            if stage == super::STAGE_CURRENT {
                // The service clears AWSPENDING once the version is promoted.
                target.stages.remove(super::STAGE_PENDING);
            }
        }
        Ok(())
    }

    async fn random_password(&self, policy: &PasswordPolicy) -> Result<String, StoreError> {
        let mut classes: Vec<Vec<char>> = Vec::new();
        let include = |chars: &str| -> Vec<char> {
            chars
                .chars()
                .filter(|c| !policy.exclude_characters.contains(*c))
                .collect()
        };
        if !policy.exclude_lowercase {
            classes.push(include("abcdefghijklmnopqrstuvwxyz"));
        }
        if !policy.exclude_uppercase {
            classes.push(include("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
        }
        if !policy.exclude_numbers {
            classes.push(include("0123456789"));
        }
        if !policy.exclude_punctuation {
            classes.push(include(PUNCTUATION));
        }
        classes.retain(|class| !class.is_empty());

        let pool: Vec<char> = classes.iter().flatten().copied().collect();
        if pool.is_empty() {
            return Err(StoreError::unhandled(
                "password policy excludes every character class",
            ));
        }

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let candidate: String = (0..policy.length)
                .map(|_| pool[rng.gen_range(0..pool.len())])
                .collect();
            let satisfied = !policy.require_each_included_type
                || classes
                    .iter()
                    .all(|class| candidate.chars().any(|c| class.contains(&c)));
            if satisfied {
                return Ok(candidate);
            }
        }
        Err(StoreError::unhandled(
            "unable to satisfy password policy after bounded attempts",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{STAGE_CURRENT, STAGE_PENDING, STAGE_PREVIOUS};

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed_secret("arn:test:1", "v1", r#"{"password":"old"}"#);
        store
    }

    #[tokio::test]
    async fn test_put_same_version_and_contents_is_noop() {
        let store = seeded_store();
        store
            .put_secret_value("arn:test:1", "v2", "doc", &[STAGE_PENDING])
            .await
            .unwrap();
        store
            .put_secret_value("arn:test:1", "v2", "doc", &[STAGE_PENDING])
            .await
            .unwrap();
        assert_eq!(store.stages("arn:test:1").len(), 2);
    }

    #[tokio::test]
    async fn test_put_same_version_different_contents_conflicts() {
        let store = seeded_store();
        store
            .put_secret_value("arn:test:1", "v2", "doc", &[STAGE_PENDING])
            .await
            .unwrap();
        let err = store
            .put_secret_value("arn:test:1", "v2", "other", &[STAGE_PENDING])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ResourceExists));
    }

    #[tokio::test]
    async fn test_begin_rotation_registers_valueless_pending_version() {
        let store = seeded_store();
        store.begin_rotation("arn:test:1", "v2");

        let metadata = store.describe_secret("arn:test:1").await.unwrap();
        assert!(metadata.stages_of("v2").unwrap().contains(STAGE_PENDING));

        let err = store
            .get_secret_value(
                "arn:test:1",
                VersionSelector::StagedVersion {
                    version_id: "v2",
                    stage: STAGE_PENDING,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_current_move_sets_previous_and_clears_pending() {
        let store = seeded_store();
        store
            .put_secret_value("arn:test:1", "v2", "doc", &[STAGE_PENDING])
            .await
            .unwrap();
        store
            .update_secret_version_stage("arn:test:1", STAGE_CURRENT, Some("v2"), Some("v1"))
            .await
            .unwrap();

        let stages = store.stages("arn:test:1");
        assert_eq!(stages["v2"], HashSet::from([STAGE_CURRENT.to_string()]));
        assert_eq!(stages["v1"], HashSet::from([STAGE_PREVIOUS.to_string()]));
    }

    #[tokio::test]
    async fn test_stage_move_requires_expected_source() {
        let store = seeded_store();
        store
            .put_secret_value("arn:test:1", "v2", "doc", &[STAGE_PENDING])
            .await
            .unwrap();
        // v2 does not hold AWSCURRENT, so it is not a valid source.
        let err = store
            .update_secret_version_stage("arn:test:1", STAGE_CURRENT, Some("v2"), Some("v2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ResourceExists));
    }

    #[tokio::test]
    async fn test_random_password_honors_policy() {
        let store = MemoryStore::new();
        let policy = PasswordPolicy {
            length: 40,
            exclude_characters: "abc".to_string(),
            exclude_punctuation: true,
            ..PasswordPolicy::default()
        };
        let password = store.random_password(&policy).await.unwrap();
        assert_eq!(password.chars().count(), 40);
        assert!(!password.contains(['a', 'b', 'c']));
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        // require_each_included_type demands at least one digit
        assert!(password.chars().any(|c| c.is_ascii_digit()));
    }
}
