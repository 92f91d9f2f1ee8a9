//! Rotation request and lifecycle step types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{RequestToken, SecretId};

/// One of the four lifecycle steps the triggering infrastructure invokes.
///
/// The steps are invoked independently, possibly with retries between
/// invocations. Serde and `Display` use the wire names the triggering
/// service sends (`createSecret`, `setSecret`, `testSecret`,
/// `finishSecret`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RotationStep {
    /// Synthesize new material and stage it under the request token.
    CreateSecret,
    /// Push the pending material to the dependent service.
    SetSecret,
    /// Validate the pending material against the dependent service.
    TestSecret,
    /// Promote the pending version to Current.
    FinishSecret,
}

impl RotationStep {
    /// Wire name of the step.
    pub fn as_str(&self) -> &'static str {
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

/// One rotation invocation: which step to run, against which secret, under
/// which idempotency token.
///
/// Immutable for the lifetime of a controller; a controller is permanently
/// bound to one `(secret_id, request_token, step)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRequest {
    step: RotationStep,
    secret_id: SecretId,
    request_token: RequestToken,
}

impl RotationRequest {
    /// Builds a request from already-validated parts.
    pub fn new(step: RotationStep, secret_id: SecretId, request_token: RequestToken) -> Self {
        Self {
            step,
            secret_id,
            request_token,
        }
    }

    /// The step this request is bound to.
    pub fn step(&self) -> RotationStep {
        self.step
    }

    /// The secret being rotated.
    pub fn secret_id(&self) -> &SecretId {
        &self.secret_id
    }

    /// The idempotency token, which is also the version id of the new
    /// secret version.
    pub fn request_token(&self) -> &RequestToken {
        &self.request_token
    }
}
