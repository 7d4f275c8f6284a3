//! # AWS Secrets Manager Store
//!
//! [`SecretStore`] implementation over the AWS Secrets Manager API.
//!
//! Authentication uses the SDK's default credential chain (environment,
//! profile, or the execution role of the Lambda/container the handler runs
//! in), with an optional region override. Password generation is delegated
//! to the `GetRandomPassword` API so the service's generator and ours never
//! disagree.

use async_trait::async_trait;
use aws_sdk_secretsmanager::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use tracing::debug;

use super::{PasswordPolicy, SecretMetadata, SecretStore, StoreError, VersionSelector};

/// AWS Secrets Manager implementation of the secret store.
#[derive(Debug, Clone)]
pub struct AwsSecretsManagerStore {
    client: SecretsManagerClient,
}

impl AwsSecretsManagerStore {
    /// Create a store using the default credential chain.
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;
        Self {
            client: SecretsManagerClient::new(&sdk_config),
        }
    }

    /// Wrap an already-configured client.
    pub fn from_client(client: SecretsManagerClient) -> Self {
        Self { client }
    }
}

/// Map an SDK failure onto the store taxonomy. Anything that is not a
/// missing or conflicting resource stays unhandled and is treated as
/// transient by the caller.
fn map_sdk_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match err.as_service_error().and_then(ProvideErrorMetadata::code) {
        Some("ResourceNotFoundException") => StoreError::NotFound,
        Some("ResourceExistsException") => StoreError::ResourceExists,
        _ => StoreError::Unhandled(Box::new(err)),
    }
}

#[async_trait]
impl SecretStore for AwsSecretsManagerStore {
    async fn describe_secret(&self, secret_id: &str) -> Result<SecretMetadata, StoreError> {
        let response = self
            .client
            .describe_secret()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let versions = response
            .version_ids_to_stages()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|(version_id, stages)| (version_id, stages.into_iter().collect()))
            .collect();

        let tags = response
            .tags()
            .iter()
            .filter_map(|tag| Some((tag.key()?.to_string(), tag.value()?.to_string())))
            .collect();

        Ok(SecretMetadata {
            rotation_enabled: response.rotation_enabled(),
            versions,
            tags,
        })
    }

    async fn get_secret_value(
        &self,
        secret_id: &str,
        selector: VersionSelector<'_>,
    ) -> Result<String, StoreError> {
        let mut request = self.client.get_secret_value().secret_id(secret_id);
        request = match selector {
            VersionSelector::Stage(stage) => request.version_stage(stage),
            VersionSelector::StagedVersion { version_id, stage } => {
                request.version_id(version_id).version_stage(stage)
            }
        };

        let response = request.send().await.map_err(map_sdk_error)?;
        response
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| StoreError::unhandled("secret has no string value"))
    }

    async fn put_secret_value(
        &self,
        secret_id: &str,
        version_id: &str,
        secret_string: &str,
        stages: &[&str],
    ) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_secret_value()
            .secret_id(secret_id)
            .client_request_token(version_id)
            .secret_string(secret_string);
        for stage in stages {
            request = request.version_stages(*stage);
        }

        let response = request.send().await.map_err(map_sdk_error)?;
        debug!(
            version_id = response.version_id().unwrap_or_default(),
            "put secret value"
        );
        Ok(())
    }

    async fn update_secret_version_stage(
        &self,
        secret_id: &str,
        stage: &str,
        move_to_version: Option<&str>,
        remove_from_version: Option<&str>,
    ) -> Result<(), StoreError> {
        self.client
            .update_secret_version_stage()
            .secret_id(secret_id)
            .version_stage(stage)
            .set_move_to_version_id(move_to_version.map(str::to_string))
            .set_remove_from_version_id(remove_from_version.map(str::to_string))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn random_password(&self, policy: &PasswordPolicy) -> Result<String, StoreError> {
        let response = self
            .client
            .get_random_password()
            .password_length(i64::from(policy.length))
            .exclude_characters(policy.exclude_characters.clone())
            .exclude_numbers(policy.exclude_numbers)
            .exclude_punctuation(policy.exclude_punctuation)
            .exclude_uppercase(policy.exclude_uppercase)
            .exclude_lowercase(policy.exclude_lowercase)
            .require_each_included_type(policy.require_each_included_type)
            .send()
            .await
            .map_err(map_sdk_error)?;

        response
            .random_password()
            .map(str::to_string)
            .ok_or_else(|| StoreError::unhandled("GetRandomPassword returned no password"))
    }
}
