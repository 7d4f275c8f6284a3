//! # Rotation Request
//!
//! The invocation contract: one event per rotation step, mirroring the
//! Secrets Manager rotation Lambda interface.
//!
//! ```json
//! {
//!     "SecretId": "arn:aws:secretsmanager:...:secret:app-db",
//!     "ClientRequestToken": "c8a6b6b2-...",
//!     "Step": "createSecret"
//! }
//! ```
//!
//! The `ClientRequestToken` doubles as the target version id and is
//! stable across all four steps of one rotation attempt.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the four rotation protocol steps, executed strictly in order by
/// the external scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationStep {
    #[serde(rename = "createSecret")]
    CreateSecret,
    #[serde(rename = "setSecret")]
    SetSecret,
    #[serde(rename = "testSecret")]
    TestSecret,
    #[serde(rename = "finishSecret")]
    FinishSecret,
}

impl RotationStep {
    /// Protocol order.
    pub const ALL: [Self; 4] = [
        Self::CreateSecret,
        Self::SetSecret,
        Self::TestSecret,
        Self::FinishSecret,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateSecret => "createSecret",
            Self::SetSecret => "setSecret",
            Self::TestSecret => "testSecret",
            Self::FinishSecret => "finishSecret",
        }
    }
}

impl fmt::Display for RotationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid step parameter '{0}'")]
pub struct ParseStepError(String);

impl FromStr for RotationStep {
    type Err = ParseStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| ParseStepError(s.to_string()))
    }
}

/// A single rotation step invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RotationRequest {
    /// The secret ARN or other identifier.
    pub secret_id: String,
    /// The secret version id this rotation attempt targets.
    pub client_request_token: String,
    pub step: RotationStep,
}

impl RotationRequest {
    pub fn new(
        secret_id: impl Into<String>,
        client_request_token: impl Into<String>,
        step: RotationStep,
    ) -> Self {
        Self {
            secret_id: secret_id.into(),
            client_request_token: client_request_token.into(),
            step,
        }
    }
}
