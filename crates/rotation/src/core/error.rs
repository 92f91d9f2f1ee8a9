//! Error taxonomy for rotation handlers
//!
//! Three families matter to callers: caller-contract violations
//! ([`RotationError::StepMismatch`]), construction-time ineligibility
//! (grouped by [`RotationError::is_ineligible`]), and collaborator
//! rejections. Store failures pass through as
//! [`RotationError::Store`]; of those only a not-found outcome gets
//! special local handling (idempotent-create detection and the
//! label-propagation poll) — everything else is opaque and fatal.

use thiserror::Error;

use crate::core::{RequestToken, RotationStep, SecretId};
use crate::store::StoreError;

/// Boxed error type for caller-supplied collaborator functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Identifier parsing failures.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Secret id was empty
    #[error("secret id must not be empty")]
    EmptySecretId,

    /// Secret id failed validation
    #[error("invalid secret id {id:?}: {reason}")]
    InvalidSecretId { id: String, reason: String },

    /// Request token was empty
    #[error("request token must not be empty")]
    EmptyRequestToken,

    /// Request token failed validation
    #[error("invalid request token {token:?}: {reason}")]
    InvalidRequestToken { token: String, reason: String },
}

/// Errors that can occur while driving a rotation step
#[derive(Debug, Error)]
pub enum RotationError {
    /// A step operation was invoked on a controller bound to a different
    /// step. Caller bug; always fatal, never retried.
    #[error("rotation handler bound to step {bound} was invoked as {requested}")]
    StepMismatch {
        bound: RotationStep,
        requested: RotationStep,
    },

    /// Rotation is switched off on the secret
    #[error("secret {secret_id} is not enabled for rotation")]
    RotationNotEnabled { secret_id: SecretId },

    /// The secret has no version-to-stage mapping at all
    #[error("secret {secret_id} has no versions for rotation")]
    NoVersionsForRotation { secret_id: SecretId },

    /// The bound request token does not name a version of the secret
    #[error("version {token} has no staging labels for rotation of secret {secret_id}")]
    UnknownRequestVersion {
        secret_id: SecretId,
        token: RequestToken,
    },

    /// The bound version carries neither Pending nor Current
    #[error("version {token} of secret {secret_id} is not labeled Pending")]
    VersionNotPending {
        secret_id: SecretId,
        token: RequestToken,
    },

    /// The caller's material generator failed during `createSecret`
    #[error("material generation failed for secret {secret_id}")]
    GenerateFailed {
        secret_id: SecretId,
        #[source]
        source: BoxError,
    },

    /// The caller's apply function rejected the pending material during
    /// `setSecret`
    #[error("applying pending secret to the service failed for {secret_id}")]
    ApplyFailed {
        secret_id: SecretId,
        #[source]
        source: BoxError,
    },

    /// The caller's validation function rejected the pending material
    /// during `testSecret`. Must always surface; masking it would silently
    /// promote a bad credential.
    #[error("pending secret failed service validation for {secret_id}")]
    ValidationFailed {
        secret_id: SecretId,
        #[source]
        source: BoxError,
    },

    /// The caller's revocation function failed
    #[error("revoking previous secret failed for {secret_id}")]
    RevokeFailed {
        secret_id: SecretId,
        #[source]
        source: BoxError,
    },

    /// Poll policy failed validation
    #[error("invalid poll policy: {reason}")]
    InvalidPolicy { reason: String },

    /// A bounded poll loop spent its budget without the value becoming
    /// visible
    #[error("poll budget exhausted after {max_attempts} attempts waiting on {operation}")]
    PollBudgetExhausted {
        operation: String,
        max_attempts: u32,
    },

    /// Store failure, propagated verbatim
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RotationError {
    /// Whether this is one of the construction-time eligibility failures.
    pub fn is_ineligible(&self) -> bool {
        matches!(
            self,
            Self::RotationNotEnabled { .. }
                | Self::NoVersionsForRotation { .. }
                | Self::UnknownRequestVersion { .. }
                | Self::VersionNotPending { .. }
        )
    }

    /// Whether this wraps a store not-found outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;
