//! Dispatch entry point for the triggering infrastructure
//!
//! [`run_rotation`] accepts one rotation invocation — step, secret id,
//! request token — plus the caller's [`RotationHooks`], constructs the
//! controller, and runs the bound step. The hooks carry the step-specific
//! collaborators: material generation for create, service apply/verify for
//! set/test, and revocation for the decoupled previous-version cleanup.

use async_trait::async_trait;
use std::sync::Arc;

use crate::controller::{CreateOutcome, FinishOutcome, RotationController};
use crate::core::{BoxError, RotationRequest, RotationResult, RotationStep, SecretMaterial};
use crate::retry::PollPolicy;
use crate::store::SecretStore;

/// Caller-supplied collaborator functions for the rotation steps.
///
/// `apply` and `revoke` default to no-ops, covering handlers whose
/// dependent system needs no push (the credential is only consumed through
/// the store) and handlers that never revoke.
#[async_trait]
pub trait RotationHooks: Send + Sync {
    /// Synthesizes new secret material for `createSecret`.
    async fn generate(&self) -> Result<SecretMaterial, BoxError>;

    /// Pushes the pending material to the dependent service for
    /// `setSecret`.
    async fn apply(&self, _material: SecretMaterial) -> Result<(), BoxError> {
        Ok(())
    }

    /// Validates the pending material against the dependent service for
    /// `testSecret`.
    async fn verify(&self, material: SecretMaterial) -> Result<(), BoxError>;

    /// Revokes an outgoing secret version for
    /// [`run_revoke_previous`].
    async fn revoke(&self, _material: SecretMaterial) -> Result<(), BoxError> {
        Ok(())
    }
}

/// What a dispatched step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// `createSecret` generated and staged new material.
    Created,
    /// `createSecret` found the version already staged (idempotent replay).
    AlreadyCreated,
    /// `setSecret` applied the pending material to the service.
    Applied,
    /// `testSecret` validated the pending material.
    Verified,
    /// `finishSecret` promoted the pending version.
    Promoted {
        /// False when a stale Pending label was left behind.
        pending_label_cleared: bool,
    },
    /// `finishSecret` found Current already on the request version.
    AlreadyCurrent,
    /// The rotation for this token had already finished; the step was
    /// skipped entirely.
    AlreadyRotated,
    /// The Previous-labeled version was revoked.
    Revoked,
}

/// Report returned by the dispatch entry points.
#[derive(Debug)]
pub struct StepReport {
    /// The step that was dispatched.
    pub step: RotationStep,
    /// What the step did.
    pub status: StepStatus,
    /// Human-readable confirmation for the caller's logs.
    pub message: String,
    /// Material fetched by an idempotent `createSecret` replay.
    pub material: Option<SecretMaterial>,
}

/// Runs the requested rotation step with the default [`PollPolicy`].
pub async fn run_rotation(
    store: Arc<dyn SecretStore>,
    request: RotationRequest,
    hooks: &dyn RotationHooks,
) -> RotationResult<StepReport> {
    run_rotation_with_policy(store, request, hooks, PollPolicy::default()).await
}

/// Runs the requested rotation step with an explicit poll policy.
///
/// When construction finds the rotation already finished for this token,
/// every step short-circuits with [`StepStatus::AlreadyRotated`] — running
/// `setSecret`/`testSecret` then would poll for a Pending label that no
/// longer exists.
pub async fn run_rotation_with_policy(
    store: Arc<dyn SecretStore>,
    request: RotationRequest,
    hooks: &dyn RotationHooks,
    policy: PollPolicy,
) -> RotationResult<StepReport> {
    let step = request.step();
    let controller = RotationController::with_policy(store, request, policy).await?;
    let secret_id = controller.request().secret_id().clone();
    let token = controller.request().request_token().clone();

    if controller.is_already_rotated() {
        return Ok(StepReport {
            step,
            status: StepStatus::AlreadyRotated,
            message: format!(
                "{step}: version {token} of secret {secret_id} is already Current, nothing to do"
            ),
            material: None,
        });
    }

    let report = match step {
        RotationStep::CreateSecret => match controller.create_secret(|| hooks.generate()).await? {
            CreateOutcome::Created => StepReport {
                step,
                status: StepStatus::Created,
                message: format!(
                    "{step}: put new secret for {secret_id} with version {token}"
                ),
                material: None,
            },
            CreateOutcome::AlreadyCreated { material } => StepReport {
                step,
                status: StepStatus::AlreadyCreated,
                message: format!(
                    "{step}: version {token} of secret {secret_id} already exists"
                ),
                material: Some(material),
            },
        },
        RotationStep::SetSecret => {
            controller
                .set_secret(|material| hooks.apply(material))
                .await?;
            StepReport {
                step,
                status: StepStatus::Applied,
                message: format!("{step}: applied pending secret for {secret_id} to the service"),
                material: None,
            }
        }
        RotationStep::TestSecret => {
            controller
                .test_secret(|material| hooks.verify(material))
                .await?;
            StepReport {
                step,
                status: StepStatus::Verified,
                message: format!(
                    "{step}: pending secret for {secret_id} passed service validation"
                ),
                material: None,
            }
        }
        RotationStep::FinishSecret => match controller.finish_secret().await? {
            FinishOutcome::AlreadyCurrent => StepReport {
                step,
                status: StepStatus::AlreadyCurrent,
                message: format!(
                    "{step}: version {token} already marked Current for secret {secret_id}"
                ),
                material: None,
            },
            FinishOutcome::Promoted {
                pending_label_cleared,
            } => StepReport {
                step,
                status: StepStatus::Promoted {
                    pending_label_cleared,
                },
                message: if pending_label_cleared {
                    format!(
                        "{step}: marked version {token} as Current for secret {secret_id}"
                    )
                } else {
                    format!(
                        "{step}: marked version {token} as Current for secret {secret_id} \
                         (stale Pending label left behind)"
                    )
                },
                material: None,
            },
        },
    };
    Ok(report)
}

/// Revokes the Previous-labeled version of the secret.
///
/// Decoupled from the four-step protocol: works with a controller bound to
/// any step, including one whose rotation already finished.
pub async fn run_revoke_previous(
    store: Arc<dyn SecretStore>,
    request: RotationRequest,
    hooks: &dyn RotationHooks,
) -> RotationResult<StepReport> {
    let step = request.step();
    let controller = RotationController::connect(store, request).await?;
    let secret_id = controller.request().secret_id().clone();

    let version_id = controller
        .revoke_previous(|material| hooks.revoke(material))
        .await?;
    Ok(StepReport {
        step,
        status: StepStatus::Revoked,
        message: format!(
            "revokePrevious: revoked previous version {version_id} for secret {secret_id}"
        ),
        material: None,
    })
}
