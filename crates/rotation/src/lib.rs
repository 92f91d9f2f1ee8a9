//! Keyturn Rotation - lifecycle-step state machine for secret rotation
//!
//! Client-side logic for a rotation handler that a secret-management
//! service invokes at four discrete lifecycle points, driving a pending
//! credential through creation, deployment, validation, and promotion to
//! Current.
//!
//! # Features
//!
//! - **Four-step protocol** - `createSecret` / `setSecret` / `testSecret` /
//!   `finishSecret`, each idempotent where the protocol demands it
//! - **Staging-label transitions** - Pending-to-Current promotion as the
//!   store's atomic label move, with residual-state reporting
//! - **Error discrimination** - "already done" vs "not allowed yet" vs
//!   caller bugs, as distinct outcomes
//! - **Propagation tolerance** - poll-on-not-found bridging label
//!   visibility lag, cancellation left to the caller by default
//! - **Pluggable collaborators** - the store, material generation, and the
//!   consuming service are caller-supplied
#![forbid(unsafe_code)]

/// The rotation state machine
pub mod controller;
/// Core types, errors, and primitives
pub mod core;
/// Dispatch entry point and collaborator hooks
pub mod handler;
/// Poll-on-not-found backoff policy
pub mod retry;
/// Store protocol types and the remote-store trait
pub mod store;

// ── Root re-exports ─────────────────────────────────────────────────────────
// Commonly-used types available directly as `keyturn_rotation::TypeName`.

pub use crate::controller::{CreateOutcome, Eligibility, FinishOutcome, RotationController};
pub use crate::core::{
    BoxError, RequestToken, RotationError, RotationRequest, RotationResult, RotationStep, SecretId,
    SecretMaterial, SecretString, ValidationError,
};
pub use crate::handler::{
    RotationHooks, StepReport, StepStatus, run_revoke_previous, run_rotation,
    run_rotation_with_policy,
};
pub use crate::retry::PollPolicy;
pub use crate::store::{
    InMemorySecretStore, SecretStore, SecretValue, StageSet, StagingSnapshot, StoreError,
    VersionSelector, VersionStage,
};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::controller::{CreateOutcome, Eligibility, FinishOutcome, RotationController};
    pub use crate::core::{
        BoxError, RequestToken, RotationError, RotationRequest, RotationResult, RotationStep,
        SecretId, SecretMaterial, SecretString,
    };
    pub use crate::handler::{RotationHooks, StepReport, StepStatus, run_rotation};
    pub use crate::retry::PollPolicy;
    pub use crate::store::{SecretStore, SecretValue, StagingSnapshot, StoreError, VersionStage};
}
