//! The rotation state machine
//!
//! [`RotationController`] wraps a single rotation attempt, bound to one
//! `(secret_id, request_token, step)` triple, and mediates between the
//! triggering caller and the store's staging-label state. Construction
//! performs the eligibility check; one operation exists per lifecycle step,
//! each validating its preconditions, calling the store, and applying a
//! label transition.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::core::{
    BoxError, RequestToken, RotationError, RotationRequest, RotationResult, RotationStep, SecretId,
    SecretMaterial,
};
use crate::retry::{PollPolicy, poll_not_found};
use crate::store::{SecretStore, SecretValue, VersionSelector, VersionStage};

/// What the eligibility check found at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// The bound version carries Pending; the rotation can proceed.
    ReadyPending,
    /// The bound version already carries Current; the rotation for this
    /// token finished earlier. Not an error, but distinguishable from the
    /// proceeding case.
    AlreadyRotated,
}

/// Result of [`RotationController::create_secret`].
#[derive(Debug)]
pub enum CreateOutcome {
    /// New material was generated and staged under the request token.
    Created,
    /// The version already existed; its material is returned and the
    /// generator was not invoked.
    AlreadyCreated {
        /// Material fetched from the existing version.
        material: SecretMaterial,
    },
}

impl CreateOutcome {
    /// Material carried by an idempotent replay, if any.
    pub fn material(&self) -> Option<&SecretMaterial> {
        match self {
            Self::Created => None,
            Self::AlreadyCreated { material } => Some(material),
        }
    }

    /// Whether this was an idempotent replay of an earlier create.
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::AlreadyCreated { .. })
    }
}

/// Result of [`RotationController::finish_secret`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// Current already pointed at the request token; nothing was mutated.
    AlreadyCurrent,
    /// Current was moved onto the request token's version.
    Promoted {
        /// False when the follow-up removal of the Pending label failed.
        /// The secret is functionally rotated either way; a stale Pending
        /// label is residual state, not a rotation failure.
        pending_label_cleared: bool,
    },
}

impl FinishOutcome {
    /// Whether a stale Pending label was left on the promoted version.
    pub fn left_stale_pending(&self) -> bool {
        matches!(
            self,
            Self::Promoted {
                pending_label_cleared: false
            }
        )
    }
}

/// State machine for one rotation attempt.
///
/// Holds an explicitly constructed store client; no process-wide state.
/// Obtain one through the async factories [`connect`](Self::connect) or
/// [`with_policy`](Self::with_policy) — eligibility is known before a
/// controller exists.
pub struct RotationController {
    store: Arc<dyn SecretStore>,
    request: RotationRequest,
    poll: PollPolicy,
    eligibility: Eligibility,
}

impl fmt::Debug for RotationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationController")
            .field("request", &self.request)
            .field("poll", &self.poll)
            .field("eligibility", &self.eligibility)
            .finish_non_exhaustive()
    }
}

impl RotationController {
    /// Builds a controller with the default [`PollPolicy`].
    ///
    /// # Errors
    ///
    /// Fails fast when the secret is ineligible for this rotation attempt:
    /// rotation disabled, no versions, the token unknown to the store, or
    /// the token's version lacking both Pending and Current. Store failures
    /// propagate as [`RotationError::Store`].
    pub async fn connect(
        store: Arc<dyn SecretStore>,
        request: RotationRequest,
    ) -> RotationResult<Self> {
        Self::with_policy(store, request, PollPolicy::default()).await
    }

    /// Builds a controller with an explicit poll policy.
    #[tracing::instrument(
        skip(store, request, poll),
        fields(
            secret_id = %request.secret_id(),
            token = %request.request_token(),
            step = %request.step(),
        )
    )]
    pub async fn with_policy(
        store: Arc<dyn SecretStore>,
        request: RotationRequest,
        poll: PollPolicy,
    ) -> RotationResult<Self> {
        poll.validate()?;

        let snapshot = store.describe(request.secret_id()).await?;
        let secret_id = request.secret_id().clone();
        let token = request.request_token().clone();

        if !snapshot.rotation_enabled {
            return Err(RotationError::RotationNotEnabled { secret_id });
        }
        let Some(versions) = snapshot.versions.as_ref() else {
            return Err(RotationError::NoVersionsForRotation { secret_id });
        };
        let Some(stages) = versions.get(token.as_str()) else {
            return Err(RotationError::UnknownRequestVersion { secret_id, token });
        };

        let eligibility = if stages.contains(&VersionStage::Current) {
            tracing::info!("request version already marked Current, rotation finished earlier");
            Eligibility::AlreadyRotated
        } else if stages.contains(&VersionStage::Pending) {
            Eligibility::ReadyPending
        } else {
            return Err(RotationError::VersionNotPending { secret_id, token });
        };

        Ok(Self {
            store,
            request,
            poll,
            eligibility,
        })
    }

    /// The request this controller is bound to.
    pub fn request(&self) -> &RotationRequest {
        &self.request
    }

    /// What the eligibility check found.
    pub fn eligibility(&self) -> Eligibility {
        self.eligibility
    }

    /// Whether the rotation for this token had already finished when the
    /// controller was constructed.
    pub fn is_already_rotated(&self) -> bool {
        self.eligibility == Eligibility::AlreadyRotated
    }

    fn secret_id(&self) -> &SecretId {
        self.request.secret_id()
    }

    fn token(&self) -> &RequestToken {
        self.request.request_token()
    }

    fn ensure_step(&self, requested: RotationStep) -> RotationResult<()> {
        if self.request.step() == requested {
            Ok(())
        } else {
            Err(RotationError::StepMismatch {
                bound: self.request.step(),
                requested,
            })
        }
    }

    /// `createSecret`: stage new material under the request token.
    ///
    /// Idempotent: when the token's version already exists, the stored
    /// material is returned and `generate` is not invoked. Only a
    /// not-found outcome routes to the generator; any other fetch error
    /// propagates unchanged.
    #[tracing::instrument(
        skip(self, generate),
        fields(secret_id = %self.secret_id(), token = %self.token())
    )]
    pub async fn create_secret<F, Fut>(&self, generate: F) -> RotationResult<CreateOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SecretMaterial, BoxError>>,
    {
        self.ensure_step(RotationStep::CreateSecret)?;

        match self
            .store
            .get_value(self.secret_id(), VersionSelector::Id(self.token().as_str()))
            .await
        {
            Ok(value) => {
                tracing::info!(version_id = %value.version_id, "version already created, replaying");
                Ok(CreateOutcome::AlreadyCreated {
                    material: value.material,
                })
            }
            Err(e) if e.is_not_found() => {
                let material = generate()
                    .await
                    .map_err(|source| RotationError::GenerateFailed {
                        secret_id: self.secret_id().clone(),
                        source,
                    })?;
                self.store
                    .put_value(
                        self.secret_id(),
                        self.token().as_str(),
                        material,
                        &[VersionStage::Pending],
                    )
                    .await?;
                tracing::info!("put new secret version labeled Pending");
                Ok(CreateOutcome::Created)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `setSecret`: fetch the Pending material and apply it to the
    /// dependent service.
    ///
    /// The fetch retries on not-found until the Pending label becomes
    /// visible (see [`PollPolicy`]); apply rejections surface as
    /// [`RotationError::ApplyFailed`].
    #[tracing::instrument(
        skip(self, apply),
        fields(secret_id = %self.secret_id(), token = %self.token())
    )]
    pub async fn set_secret<F, Fut>(&self, apply: F) -> RotationResult<()>
    where
        F: FnOnce(SecretMaterial) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        self.ensure_step(RotationStep::SetSecret)?;

        let value = self.fetch_pending("setSecret").await?;
        apply(value.material)
            .await
            .map_err(|source| RotationError::ApplyFailed {
                secret_id: self.secret_id().clone(),
                source,
            })?;
        tracing::info!(version_id = %value.version_id, "applied pending secret to the service");
        Ok(())
    }

    /// `testSecret`: fetch the Pending material and run the caller's
    /// validation against it.
    ///
    /// A rejection surfaces as [`RotationError::ValidationFailed`] and is
    /// never retried here.
    #[tracing::instrument(
        skip(self, verify),
        fields(secret_id = %self.secret_id(), token = %self.token())
    )]
    pub async fn test_secret<F, Fut>(&self, verify: F) -> RotationResult<()>
    where
        F: FnOnce(SecretMaterial) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        self.ensure_step(RotationStep::TestSecret)?;

        let value = self.fetch_pending("testSecret").await?;
        verify(value.material)
            .await
            .map_err(|source| RotationError::ValidationFailed {
                secret_id: self.secret_id().clone(),
                source,
            })?;
        tracing::info!(version_id = %value.version_id, "pending secret passed service validation");
        Ok(())
    }

    /// `finishSecret`: promote the request token's version to Current.
    ///
    /// Idempotent: when Current already points at the token, nothing is
    /// mutated. The promotion is two dependent store calls, not one atomic
    /// operation: the Current move itself is atomic; the follow-up removal
    /// of the now-redundant Pending label is separate. A failure of the
    /// second call leaves the secret correctly rotated with a stale
    /// Pending label — reported via the outcome, never escalated and never
    /// rolled back.
    #[tracing::instrument(
        skip(self),
        fields(secret_id = %self.secret_id(), token = %self.token())
    )]
    pub async fn finish_secret(&self) -> RotationResult<FinishOutcome> {
        self.ensure_step(RotationStep::FinishSecret)?;

        let current = self
            .store
            .get_value(
                self.secret_id(),
                VersionSelector::Stage(VersionStage::Current),
            )
            .await?;
        if current.version_id == self.token().as_str() {
            tracing::info!("request version already marked Current");
            return Ok(FinishOutcome::AlreadyCurrent);
        }

        self.store
            .move_stage(
                self.secret_id(),
                VersionStage::Current,
                Some(self.token().as_str()),
                Some(&current.version_id),
            )
            .await?;
        tracing::info!(old_version = %current.version_id, "moved Current onto request version");

        match self
            .store
            .move_stage(
                self.secret_id(),
                VersionStage::Pending,
                None,
                Some(self.token().as_str()),
            )
            .await
        {
            Ok(()) => Ok(FinishOutcome::Promoted {
                pending_label_cleared: true,
            }),
            Err(e) => {
                // The rotation itself has succeeded; only the cleanup of
                // the redundant Pending label failed.
                tracing::warn!(error = %e, "stale Pending label left on promoted version");
                Ok(FinishOutcome::Promoted {
                    pending_label_cleared: false,
                })
            }
        }
    }

    /// Revokes whichever version carries the Previous label.
    ///
    /// Cleanup tied to label state rather than to the four-step protocol:
    /// callable regardless of the bound step. Returns the revoked version
    /// id.
    #[tracing::instrument(
        skip(self, revoke),
        fields(secret_id = %self.secret_id())
    )]
    pub async fn revoke_previous<F, Fut>(&self, revoke: F) -> RotationResult<String>
    where
        F: FnOnce(SecretMaterial) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        let value = self
            .store
            .get_value(
                self.secret_id(),
                VersionSelector::Stage(VersionStage::Previous),
            )
            .await?;
        revoke(value.material)
            .await
            .map_err(|source| RotationError::RevokeFailed {
                secret_id: self.secret_id().clone(),
                source,
            })?;
        tracing::info!(version_id = %value.version_id, "revoked previous secret version");
        Ok(value.version_id)
    }

    async fn fetch_pending(&self, operation: &str) -> RotationResult<SecretValue> {
        poll_not_found(&self.poll, operation, || {
            self.store.get_value(
                self.secret_id(),
                VersionSelector::Stage(VersionStage::Pending),
            )
        })
        .await
    }
}
