//! # Error Taxonomy
//!
//! Failure classification for rotation steps:
//!
//! - [`RotationError::Configuration`] - malformed secret document, missing
//!   masterarn, rotation disabled, token not staged. Fatal; the coordinator
//!   does not retry these.
//! - [`RotationError::Store`] - the secret store was unavailable or
//!   inconsistent. The external scheduler may safely retry the whole step.
//! - [`RotationError::Database`] - admin connection or SQL failure while
//!   setting the pending password.
//! - [`RotationError::AuthenticationFailed`] - the credential under test
//!   could not log in. Expected failure mode of `testSecret`; stage labels
//!   are left unchanged and the scheduler retries on its own cadence.
//!
//! Preconditions already satisfied by a previous attempt (pending version
//! already written, target version already current) are not errors; steps
//! log and return success.

use crate::database::DatabaseError;
use crate::store::StoreError;

/// Typed failure returned by the rotation entry point.
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    /// The secret or its document is not usable for rotation. Not retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Secret store failure; safe for the scheduler to retry the step.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Database failure while mutating credentials.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A credential failed a real authentication round trip.
    #[error("authentication failed for user '{username}' at host '{host}'")]
    AuthenticationFailed { username: String, host: String },
}

impl RotationError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
