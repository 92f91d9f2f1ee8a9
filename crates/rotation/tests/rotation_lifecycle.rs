//! Controller-level tests for the four-step rotation protocol against the
//! in-memory store: construction gating, idempotency, label-propagation
//! polling, and the finish promotion sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rstest::rstest;

use keyturn_rotation::prelude::*;
use keyturn_rotation::store::{InMemorySecretStore, StageMove};

const SECRET_ID: &str = "arn:aws:secretsmanager:eu-west-1:123:secret:db-creds";
const OLD_VERSION: &str = "version-id-old";
const NEW_VERSION: &str = "version-id-new";

fn secret_id() -> SecretId {
    SecretId::new(SECRET_ID).unwrap()
}

fn request(step: RotationStep) -> RotationRequest {
    RotationRequest::new(
        step,
        secret_id(),
        RequestToken::new(NEW_VERSION).unwrap(),
    )
}

fn fast_policy(max_attempts: Option<u32>) -> PollPolicy {
    PollPolicy {
        initial_backoff: Duration::from_millis(1),
        backoff_multiplier: 2.0,
        max_backoff: Duration::from_millis(5),
        max_attempts,
    }
}

/// Store state a rotation normally starts from: the old version holds
/// Current with a value, the request token is staged Pending with no value
/// put yet.
async fn fresh_rotation_store() -> Arc<InMemorySecretStore> {
    let store = Arc::new(InMemorySecretStore::new());
    store
        .upsert_version(&secret_id(), OLD_VERSION, "old-secret".into(), [
            VersionStage::Current,
        ])
        .await;
    store
        .stage_version(&secret_id(), NEW_VERSION, [VersionStage::Pending])
        .await;
    store
}

/// Store state after `createSecret` ran: the pending version has a value.
async fn created_rotation_store() -> Arc<InMemorySecretStore> {
    let store = Arc::new(InMemorySecretStore::new());
    store
        .upsert_version(&secret_id(), OLD_VERSION, "old-secret".into(), [
            VersionStage::Current,
        ])
        .await;
    store
        .upsert_version(&secret_id(), NEW_VERSION, "new-secret".into(), [
            VersionStage::Pending,
        ])
        .await;
    store
}

mod construction {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn succeeds_when_token_is_pending() {
        let store = fresh_rotation_store().await;
        let controller =
            RotationController::connect(store, request(RotationStep::CreateSecret))
                .await
                .unwrap();
        assert_eq!(controller.eligibility(), Eligibility::ReadyPending);
        assert!(!controller.is_already_rotated());
    }

    #[tokio::test]
    async fn fails_when_rotation_disabled() {
        let store = Arc::new(InMemorySecretStore::new());
        store.upsert_secret(&secret_id(), false).await;

        let err = RotationController::connect(store, request(RotationStep::CreateSecret))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::RotationNotEnabled { .. }));
        assert!(err.is_ineligible());
    }

    #[tokio::test]
    async fn fails_when_secret_has_no_version_map() {
        let store = Arc::new(InMemorySecretStore::new());
        store.upsert_secret(&secret_id(), true).await;

        let err = RotationController::connect(store, request(RotationStep::CreateSecret))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::NoVersionsForRotation { .. }));
    }

    #[tokio::test]
    async fn fails_when_token_unknown() {
        let store = Arc::new(InMemorySecretStore::new());
        store.upsert_secret(&secret_id(), true).await;
        store.init_version_map(&secret_id()).await;

        let err = RotationController::connect(store.clone(), request(RotationStep::CreateSecret))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::UnknownRequestVersion { .. }));

        // Same outcome when other versions exist but not the token.
        store
            .upsert_version(&secret_id(), OLD_VERSION, "old".into(), [VersionStage::Current])
            .await;
        let err = RotationController::connect(store, request(RotationStep::CreateSecret))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::UnknownRequestVersion { .. }));
    }

    #[tokio::test]
    async fn fails_when_token_lacks_pending_and_current() {
        let store = Arc::new(InMemorySecretStore::new());
        store.stage_version(&secret_id(), NEW_VERSION, []).await;

        let err = RotationController::connect(store, request(RotationStep::CreateSecret))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::VersionNotPending { .. }));
        assert!(err.is_ineligible());

        // Previous alone does not qualify either.
        let store = Arc::new(InMemorySecretStore::new());
        store
            .stage_version(&secret_id(), NEW_VERSION, [VersionStage::Previous])
            .await;
        let err = RotationController::connect(store, request(RotationStep::CreateSecret))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::VersionNotPending { .. }));
    }

    #[tokio::test]
    async fn already_current_is_a_distinguishable_no_op() {
        let store = Arc::new(InMemorySecretStore::new());
        store
            .upsert_version(&secret_id(), NEW_VERSION, "new".into(), [VersionStage::Current])
            .await;

        let controller =
            RotationController::connect(store.clone(), request(RotationStep::CreateSecret))
                .await
                .unwrap();
        assert!(controller.is_already_rotated());
        assert_eq!(controller.eligibility(), Eligibility::AlreadyRotated);

        // Construction read metadata once and mutated nothing.
        assert_eq!(store.describe_calls(), 1);
        assert_eq!(store.put_calls(), 0);
        assert_eq!(store.move_calls(), 0);
    }

    #[tokio::test]
    async fn debug_output_shows_binding_not_store() {
        let store = fresh_rotation_store().await;
        let controller =
            RotationController::connect(store, request(RotationStep::CreateSecret))
                .await
                .unwrap();

        let rendered = format!("{controller:?}");
        assert!(rendered.contains("ReadyPending"));
        assert!(rendered.contains(NEW_VERSION));
        assert!(!rendered.contains("InMemorySecretStore"));
    }

    #[tokio::test]
    async fn rejects_invalid_poll_policy() {
        let store = fresh_rotation_store().await;
        let policy = PollPolicy {
            max_attempts: Some(0),
            ..PollPolicy::default()
        };
        let err = RotationController::with_policy(
            store,
            request(RotationStep::SetSecret),
            policy,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RotationError::InvalidPolicy { .. }));
    }
}

mod step_gating {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest]
    #[case(RotationStep::SetSecret)]
    #[case(RotationStep::TestSecret)]
    #[case(RotationStep::FinishSecret)]
    #[tokio::test]
    async fn create_on_other_steps_is_a_caller_bug(#[case] bound: RotationStep) {
        let store = created_rotation_store().await;
        let controller = RotationController::connect(store.clone(), request(bound))
            .await
            .unwrap();

        let err = controller
            .create_secret(|| async { Ok("unused".into()) })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RotationError::StepMismatch { requested: RotationStep::CreateSecret, .. }
        ));
        // Rejected before any store read or write beyond construction.
        assert_eq!(store.get_calls(), 0);
        assert_eq!(store.put_calls(), 0);
    }

    #[rstest]
    #[case(RotationStep::CreateSecret)]
    #[case(RotationStep::FinishSecret)]
    #[tokio::test]
    async fn set_test_and_finish_check_their_step(#[case] bound: RotationStep) {
        let store = created_rotation_store().await;
        let controller = RotationController::connect(store, request(bound))
            .await
            .unwrap();

        let err = controller
            .set_secret(|_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::StepMismatch { .. }));

        let err = controller
            .test_secret(|_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::StepMismatch { .. }));

        if bound != RotationStep::FinishSecret {
            let err = controller.finish_secret().await.unwrap_err();
            assert!(matches!(err, RotationError::StepMismatch { .. }));
        }
    }
}

mod create {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn generates_and_stages_material_once() {
        let store = fresh_rotation_store().await;
        let controller =
            RotationController::connect(store.clone(), request(RotationStep::CreateSecret))
                .await
                .unwrap();

        let generated = AtomicU32::new(0);
        let outcome = controller
            .create_secret(|| async {
                generated.fetch_add(1, Ordering::SeqCst);
                Ok(SecretMaterial::from_string("new-secret"))
            })
            .await
            .unwrap();

        assert!(!outcome.is_replay());
        assert_eq!(generated.load(Ordering::SeqCst), 1);
        assert_eq!(store.put_calls(), 1);

        let stages = store.stages_of(&secret_id(), NEW_VERSION).await.unwrap();
        assert!(stages.contains(&VersionStage::Pending));
    }

    #[tokio::test]
    async fn replay_returns_existing_material_without_generating() {
        let store = created_rotation_store().await;
        let controller =
            RotationController::connect(store.clone(), request(RotationStep::CreateSecret))
                .await
                .unwrap();

        let generated = AtomicU32::new(0);
        let outcome = controller
            .create_secret(|| async {
                generated.fetch_add(1, Ordering::SeqCst);
                Ok("should-not-be-used".into())
            })
            .await
            .unwrap();

        assert!(outcome.is_replay());
        assert_eq!(
            outcome.material(),
            Some(&SecretMaterial::from_string("new-secret"))
        );
        assert_eq!(generated.load(Ordering::SeqCst), 0);
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn generator_failure_surfaces() {
        let store = fresh_rotation_store().await;
        let controller =
            RotationController::connect(store.clone(), request(RotationStep::CreateSecret))
                .await
                .unwrap();

        let err = controller
            .create_secret(|| async { Err("entropy source offline".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::GenerateFailed { .. }));
        assert_eq!(store.put_calls(), 0);
    }
}

mod set_and_test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn set_bridges_label_propagation_lag() {
        let store = created_rotation_store().await;
        // First Pending read comes back empty, as right after a put.
        store.delay_stage_visibility(VersionStage::Pending, 1);

        let controller = RotationController::with_policy(
            store.clone(),
            request(RotationStep::SetSecret),
            fast_policy(None),
        )
        .await
        .unwrap();

        controller
            .set_secret(|material| async move {
                assert_eq!(material, SecretMaterial::from_string("new-secret"));
                Ok(())
            })
            .await
            .unwrap();

        // One hidden read plus the successful one.
        assert_eq!(store.get_calls(), 2);
    }

    #[tokio::test]
    async fn apply_rejection_is_fatal() {
        let store = created_rotation_store().await;
        let controller =
            RotationController::connect(store, request(RotationStep::SetSecret))
                .await
                .unwrap();

        let err = controller
            .set_secret(|_| async { Err("service rejected credential push".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::ApplyFailed { .. }));
    }

    #[tokio::test]
    async fn test_validation_failure_is_never_retried() {
        let store = created_rotation_store().await;
        let controller = RotationController::with_policy(
            store.clone(),
            request(RotationStep::TestSecret),
            fast_policy(None),
        )
        .await
        .unwrap();

        let attempts = AtomicU32::new(0);
        let err = controller
            .test_secret(|_| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("login with pending credential failed".into())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RotationError::ValidationFailed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounded_poll_gives_up_when_value_never_appears() {
        // Token staged but no value was ever put.
        let store = fresh_rotation_store().await;
        let controller = RotationController::with_policy(
            store.clone(),
            request(RotationStep::TestSecret),
            fast_policy(Some(3)),
        )
        .await
        .unwrap();

        let err = controller
            .test_secret(|_| async { Ok(()) })
            .await
            .unwrap_err();
        match err {
            RotationError::PollBudgetExhausted { max_attempts, .. } => {
                assert_eq!(max_attempts, 3);
            }
            other => panic!("expected PollBudgetExhausted, got {other:?}"),
        }
        assert_eq!(store.get_calls(), 3);
    }
}

mod finish {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn promotes_with_exactly_two_label_moves() {
        let store = created_rotation_store().await;
        let controller =
            RotationController::connect(store.clone(), request(RotationStep::FinishSecret))
                .await
                .unwrap();

        let outcome = controller.finish_secret().await.unwrap();
        assert_eq!(
            outcome,
            FinishOutcome::Promoted {
                pending_label_cleared: true
            }
        );
        assert!(!outcome.left_stale_pending());

        assert_eq!(
            store.stage_moves(),
            vec![
                StageMove {
                    stage: VersionStage::Current,
                    move_to: Some(NEW_VERSION.to_string()),
                    remove_from: Some(OLD_VERSION.to_string()),
                },
                StageMove {
                    stage: VersionStage::Pending,
                    move_to: None,
                    remove_from: Some(NEW_VERSION.to_string()),
                },
            ]
        );

        let new_stages = store.stages_of(&secret_id(), NEW_VERSION).await.unwrap();
        assert!(new_stages.contains(&VersionStage::Current));
        assert!(!new_stages.contains(&VersionStage::Pending));
        let old_stages = store.stages_of(&secret_id(), OLD_VERSION).await.unwrap();
        assert!(!old_stages.contains(&VersionStage::Current));
    }

    #[tokio::test]
    async fn already_current_performs_zero_mutations() {
        let store = Arc::new(InMemorySecretStore::new());
        store
            .upsert_version(&secret_id(), NEW_VERSION, "new-secret".into(), [
                VersionStage::Current,
            ])
            .await;

        let controller =
            RotationController::connect(store.clone(), request(RotationStep::FinishSecret))
                .await
                .unwrap();
        let outcome = controller.finish_secret().await.unwrap();

        assert_eq!(outcome, FinishOutcome::AlreadyCurrent);
        assert_eq!(store.move_calls(), 0);
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn failed_pending_cleanup_is_residual_state_not_failure() {
        let store = created_rotation_store().await;
        // The Current move succeeds, the Pending removal fails.
        store.fail_move_stage_after(1);

        let controller =
            RotationController::connect(store.clone(), request(RotationStep::FinishSecret))
                .await
                .unwrap();
        let outcome = controller.finish_secret().await.unwrap();

        assert_eq!(
            outcome,
            FinishOutcome::Promoted {
                pending_label_cleared: false
            }
        );
        assert!(outcome.left_stale_pending());

        // The promotion was not rolled back: Current sits on the new
        // version, the stale Pending label remains.
        let new_stages = store.stages_of(&secret_id(), NEW_VERSION).await.unwrap();
        assert!(new_stages.contains(&VersionStage::Current));
        assert!(new_stages.contains(&VersionStage::Pending));
        assert_eq!(store.stage_moves().len(), 1);
    }

    #[tokio::test]
    async fn missing_current_propagates_verbatim() {
        let store = Arc::new(InMemorySecretStore::new());
        store
            .upsert_version(&secret_id(), NEW_VERSION, "new-secret".into(), [
                VersionStage::Pending,
            ])
            .await;

        let controller =
            RotationController::connect(store, request(RotationStep::FinishSecret))
                .await
                .unwrap();
        let err = controller.finish_secret().await.unwrap_err();
        assert!(matches!(err, RotationError::Store(StoreError::NotFound { .. })));
    }
}

mod revoke_previous {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn works_regardless_of_bound_step() {
        let store = created_rotation_store().await;
        store
            .upsert_version(&secret_id(), "version-id-prev", "retired-secret".into(), [
                VersionStage::Previous,
            ])
            .await;

        // Bound to CreateSecret, yet revocation is allowed.
        let controller =
            RotationController::connect(store, request(RotationStep::CreateSecret))
                .await
                .unwrap();

        let version_id = controller
            .revoke_previous(|material| async move {
                assert_eq!(material, SecretMaterial::from_string("retired-secret"));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(version_id, "version-id-prev");
    }

    #[tokio::test]
    async fn missing_previous_label_propagates() {
        let store = created_rotation_store().await;
        let controller =
            RotationController::connect(store, request(RotationStep::CreateSecret))
                .await
                .unwrap();

        let err = controller
            .revoke_previous(|_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::Store(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn revocation_failure_surfaces() {
        let store = created_rotation_store().await;
        store
            .upsert_version(&secret_id(), "version-id-prev", "retired-secret".into(), [
                VersionStage::Previous,
            ])
            .await;
        let controller =
            RotationController::connect(store, request(RotationStep::CreateSecret))
                .await
                .unwrap();

        let err = controller
            .revoke_previous(|_| async { Err("revocation endpoint returned 500".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::RevokeFailed { .. }));
    }
}
