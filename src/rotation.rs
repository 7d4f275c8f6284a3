//! # Rotation Coordinator
//!
//! The four-step rotation state machine:
//! `createSecret -> setSecret -> testSecret -> finishSecret`.
//!
//! Every step is invoked as its own stateless unit of work, possibly in a
//! different process instance, and delivery is at-least-once. Each step
//! therefore reconstructs its precondition from the secret store's stage
//! labels and version ids - never from in-process memory - and every
//! mutation is idempotent under retry. When `createSecret`'s response is
//! lost and the step re-runs, the password held by the `AWSPENDING`
//! version wins; the store is authoritative.
//!
//! The alternating-user scheme keeps the active credential valid for the
//! whole rotation: the new password lands on whichever identity of the
//! pair is not currently referenced by `AWSCURRENT`, and promotion only
//! happens after `testSecret` has authenticated with it.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::HandlerConfig;
use crate::database::DatabaseCredentialManager;
use crate::document::SecretDocument;
use crate::error::RotationError;
use crate::request::{RotationRequest, RotationStep};
use crate::store::{
    SecretStore, StoreError, VersionSelector, STAGE_CURRENT, STAGE_PENDING,
};
use crate::topology::{DatabaseTopology, PrimaryDatabaseArn};

/// Orchestrates rotation steps over a secret store and a database.
pub struct RotationCoordinator {
    store: Arc<dyn SecretStore>,
    database: Arc<dyn DatabaseCredentialManager>,
    topology: Option<Arc<dyn DatabaseTopology>>,
    config: HandlerConfig,
}

impl fmt::Debug for RotationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationCoordinator")
            .field("config", &self.config)
            .field("topology", &self.topology.is_some())
            .finish_non_exhaustive()
    }
}

impl RotationCoordinator {
    pub fn new(
        store: Arc<dyn SecretStore>,
        database: Arc<dyn DatabaseCredentialManager>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            store,
            database,
            topology: None,
            config,
        }
    }

    /// Enable RDS replica validation and master endpoint resolution.
    #[must_use]
    pub fn with_topology(mut self, topology: Arc<dyn DatabaseTopology>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Service-invoked entry point: validate the invocation against the
    /// secret's staging state, then run the requested step.
    ///
    /// A token already staged `AWSCURRENT` means a previous attempt
    /// completed; that is success, not an error.
    pub async fn execute(&self, request: &RotationRequest) -> Result<(), RotationError> {
        let arn = request.secret_id.as_str();
        let token = request.client_request_token.as_str();

        let metadata = self.store.describe_secret(arn).await?;
        if metadata.rotation_enabled == Some(false) {
            error!(secret = arn, "secret is not enabled for rotation");
            return Err(RotationError::config(format!(
                "secret {arn} is not enabled for rotation"
            )));
        }
        let Some(stages) = metadata.stages_of(token) else {
            error!(secret = arn, token, "secret version has no stage for rotation");
            return Err(RotationError::config(format!(
                "secret version {token} has no stage for rotation of secret {arn}"
            )));
        };
        if stages.contains(STAGE_CURRENT) {
            info!(secret = arn, token, "version already set as AWSCURRENT");
            return Ok(());
        }
        if !stages.contains(STAGE_PENDING) {
            error!(secret = arn, token, "version not set as AWSPENDING for rotation");
            return Err(RotationError::config(format!(
                "secret version {token} not set as AWSPENDING for rotation of secret {arn}"
            )));
        }

        self.run_step(arn, token, request.step).await
    }

    /// Run all four steps in protocol order for one rotation attempt,
    /// stopping at the first failure. A local stand-in for the external
    /// scheduler, used by the CLI `rotate` command.
    pub async fn run_rotation(&self, secret_id: &str, token: &str) -> Result<(), RotationError> {
        for step in RotationStep::ALL {
            info!(%step, secret = secret_id, token, "running rotation step");
            self.run_step(secret_id, token, step).await?;
        }
        Ok(())
    }

    pub(crate) async fn run_step(
        &self,
        secret_id: &str,
        token: &str,
        step: RotationStep,
    ) -> Result<(), RotationError> {
        match step {
            RotationStep::CreateSecret => self.create_secret(secret_id, token).await,
            RotationStep::SetSecret => self.set_secret(secret_id, token).await,
            RotationStep::TestSecret => self.test_secret(secret_id, token).await,
            RotationStep::FinishSecret => self.finish_secret(secret_id, token).await,
        }
    }

    /// Stage a candidate credential: the current document with the
    /// alternate username and a freshly generated password, written as a
    /// new version labeled `AWSPENDING`. No-op when the pending version
    /// for this token already exists.
    async fn create_secret(&self, arn: &str, token: &str) -> Result<(), RotationError> {
        // The current document must exist and be usable before staging
        // anything.
        let current = self
            .secret_document(arn, VersionSelector::Stage(STAGE_CURRENT), false)
            .await?;

        let pending = self
            .store
            .get_secret_value(
                arn,
                VersionSelector::StagedVersion {
                    version_id: token,
                    stage: STAGE_PENDING,
                },
            )
            .await;
        match pending {
            Ok(_) => {
                info!(secret = arn, token, "createSecret: pending version already staged");
                Ok(())
            }
            Err(StoreError::NotFound) => {
                let mut candidate = current.clone();
                candidate.username = current.alternate_username()?;
                candidate.password = self
                    .store
                    .random_password(&self.config.password_policy)
                    .await?;

                self.store
                    .put_secret_value(arn, token, &candidate.to_secret_string()?, &[STAGE_PENDING])
                    .await?;
                info!(
                    secret = arn,
                    token,
                    user = ?candidate.rotation_user(),
                    "createSecret: staged new pending version"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Apply the pending password to the live database through the master
    /// credentials. Safe under retry: the password written is always the
    /// one held by the `AWSPENDING` version.
    async fn set_secret(&self, arn: &str, token: &str) -> Result<(), RotationError> {
        let current = self
            .secret_document(arn, VersionSelector::Stage(STAGE_CURRENT), false)
            .await?;
        let pending = self
            .secret_document(
                arn,
                VersionSelector::StagedVersion {
                    version_id: token,
                    stage: STAGE_PENDING,
                },
                false,
            )
            .await?;

        // The credential being rotated must itself still authenticate;
        // refusing to touch anything else guards against a swapped-in
        // document pointing the rotation at a foreign user.
        if let Err(err) = self.database.verify_login(&current).await {
            error!(
                secret = arn,
                error = %err,
                "setSecret: unable to log into database with current credentials"
            );
            return Err(RotationError::AuthenticationFailed {
                username: current.username.clone(),
                host: current.host().to_string(),
            });
        }

        if current.alternate_username()? != pending.username {
            return Err(RotationError::config(format!(
                "attempting to modify user {} other than current user or clone {}",
                pending.username, current.username
            )));
        }
        if current.host != pending.host {
            return Err(RotationError::config(format!(
                "attempting to modify user for host {} other than current host {}",
                pending.host(),
                current.host()
            )));
        }

        let master_arn = current.masterarn.clone().ok_or_else(|| {
            RotationError::config(format!("masterarn key is missing from secret {arn}"))
        })?;
        let mut master = self
            .secret_document(&master_arn, VersionSelector::Stage(STAGE_CURRENT), true)
            .await?;
        // The admin connects to the child's database, not its own default.
        master.dbname = current.dbname.clone();

        if current.host() != master.host() && !self.validated_replica(&current, &master).await? {
            return Err(RotationError::config(format!(
                "current database host {} is not the same host as or a replica of master {}",
                current.host(),
                master.host()
            )));
        }

        self.database
            .apply_password(&master, &current.username, &pending.username, &pending.password)
            .await?;
        info!(
            secret = arn,
            token,
            username = %pending.username,
            "setSecret: set password in database"
        );
        Ok(())
    }

    /// Authenticate with the pending credential, with a small bounded
    /// number of reconnect attempts. Failure leaves every stage label
    /// untouched; the scheduler retries on its own cadence.
    async fn test_secret(&self, arn: &str, token: &str) -> Result<(), RotationError> {
        let pending = self
            .secret_document(
                arn,
                VersionSelector::StagedVersion {
                    version_id: token,
                    stage: STAGE_PENDING,
                },
                false,
            )
            .await?;

        let attempts = self.config.test_connection_attempts.max(1);
        for attempt in 1..=attempts {
            match self.database.verify_login(&pending).await {
                Ok(()) => {
                    info!(
                        secret = arn,
                        token, "testSecret: signed in with pending credential"
                    );
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        secret = arn,
                        attempt,
                        error = %err,
                        "testSecret: pending credential failed to authenticate"
                    );
                }
            }
        }

        error!(
            secret = arn,
            token, "testSecret: unable to log into database with pending credential"
        );
        Err(RotationError::AuthenticationFailed {
            username: pending.username.clone(),
            host: pending.host().to_string(),
        })
    }

    /// Promote the pending version: move `AWSCURRENT` from the old version
    /// onto the token's version in a single conditional stage move. The
    /// vacated version becomes `AWSPREVIOUS`. No-op when the token is
    /// already current.
    async fn finish_secret(&self, arn: &str, token: &str) -> Result<(), RotationError> {
        let metadata = self.store.describe_secret(arn).await?;
        let current_version = metadata.version_with_stage(STAGE_CURRENT);
        if current_version == Some(token) {
            info!(secret = arn, token, "finishSecret: version already marked AWSCURRENT");
            return Ok(());
        }

        self.store
            .update_secret_version_stage(arn, STAGE_CURRENT, Some(token), current_version)
            .await?;
        info!(
            secret = arn,
            token, "finishSecret: set AWSCURRENT stage to new version"
        );
        Ok(())
    }

    async fn validated_replica(
        &self,
        current: &SecretDocument,
        master: &SecretDocument,
    ) -> Result<bool, RotationError> {
        match &self.topology {
            Some(topology) => topology
                .is_replica_of(current, master)
                .await
                .map_err(|err| RotationError::config(err.to_string())),
            None => Ok(false),
        }
    }

    /// Fetch and validate a credential document. For master secrets, a
    /// bare `{username, password}` document (RDS-managed) gets its
    /// connection parameters resolved from the RDS API first.
    async fn secret_document(
        &self,
        secret_id: &str,
        selector: VersionSelector<'_>,
        master_secret: bool,
    ) -> Result<SecretDocument, RotationError> {
        let secret_string = self.store.get_secret_value(secret_id, selector).await?;
        let mut document = SecretDocument::parse(&secret_string)?;
        if master_secret && document.is_bare_credentials() {
            document = self.resolve_master_document(secret_id, document).await?;
        }
        document.validate()?;
        Ok(document)
    }

    async fn resolve_master_document(
        &self,
        secret_id: &str,
        mut document: SecretDocument,
    ) -> Result<SecretDocument, RotationError> {
        let Some(topology) = &self.topology else {
            // validate() reports the missing connection parameters.
            return Ok(document);
        };

        let metadata = self.store.describe_secret(secret_id).await?;
        let reference = PrimaryDatabaseArn::from_tags(&metadata.tags)
            .map_err(|err| RotationError::config(err.to_string()))?;
        let Some(reference) = reference else {
            warn!(
                secret = secret_id,
                "master secret carries no primary instance or cluster tag"
            );
            return Ok(document);
        };

        let endpoint = topology
            .primary_endpoint(&reference)
            .await
            .map_err(|err| RotationError::config(err.to_string()))?;
        document.host = Some(endpoint.host);
        document.port = endpoint.port;
        document.engine = endpoint.engine;
        info!(
            secret = secret_id,
            "resolved master secret connection parameters from RDS"
        );
        Ok(document)
    }
}
