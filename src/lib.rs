//! # Secret Rotation Handler Library
//!
//! Alternating-user credential rotation for RDS PostgreSQL, driven by the
//! Secrets Manager rotation protocol. The crate wires three parts
//! together:
//!
//! 1. **Secret store adapter** ([`store`]) - versioned credential
//!    documents and their staging labels, over AWS Secrets Manager or an
//!    in-memory store.
//! 2. **Database credential manager** ([`database`]) - creates/alters the
//!    alternating user's password over an authenticated admin connection.
//! 3. **Rotation coordinator** ([`rotation`]) - the four-step
//!    `createSecret -> setSecret -> testSecret -> finishSecret` state
//!    machine, invoked once per step.
//!
//! Tests are included in the module files; end-to-end step-machine tests
//! live in `tests/`.

pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod request;
pub mod rotation;
pub mod store;
pub mod topology;

pub use config::HandlerConfig;
pub use database::{DatabaseCredentialManager, DatabaseError, PostgresCredentialManager};
pub use document::{RotationUser, SecretDocument};
pub use error::RotationError;
pub use request::{RotationRequest, RotationStep};
pub use rotation::RotationCoordinator;
pub use store::{
    AwsSecretsManagerStore, MemoryStore, PasswordPolicy, SecretMetadata, SecretStore, StoreError,
    VersionSelector, STAGE_CURRENT, STAGE_PENDING, STAGE_PREVIOUS,
};
pub use topology::{DatabaseTopology, RdsTopology};
