//! Poll-on-not-found with exponential backoff
//!
//! Immediately after `createSecret` stores material, the Pending label may
//! not be visible to reads yet. The poll loop bridges that propagation lag:
//! it retries a fetch only on a not-found outcome, backing off between
//! iterations, and exits immediately on any other error.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::core::{RotationError, RotationResult};
use crate::store::StoreError;

/// Backoff configuration for the not-found poll loop.
///
/// By default the loop is unbounded (`max_attempts: None`): the caller's
/// own deadline or cancellation governs how long a step may wait, and each
/// iteration is a single suspension so dropping the future cancels cleanly.
/// Set `max_attempts` to fail locally with
/// [`RotationError::PollBudgetExhausted`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Backoff before the second read.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Backoff multiplier per iteration (2.0 for exponential).
    pub backoff_multiplier: f32,

    /// Cap on the per-iteration backoff.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Optional bound on read attempts. `None` leaves cancellation to the
    /// caller.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl PollPolicy {
    /// Checks the policy for nonsense values.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::InvalidPolicy`] when the backoff is zero,
    /// the multiplier is below 1, the cap is below the initial backoff, or
    /// `max_attempts` is `Some(0)`.
    pub fn validate(&self) -> RotationResult<()> {
        if self.initial_backoff.is_zero() {
            return Err(RotationError::InvalidPolicy {
                reason: "initial_backoff must be positive".to_string(),
            });
        }
        if self.backoff_multiplier < 1.0 {
            return Err(RotationError::InvalidPolicy {
                reason: format!(
                    "backoff_multiplier must be at least 1.0, got {}",
                    self.backoff_multiplier
                ),
            });
        }
        if self.max_backoff < self.initial_backoff {
            return Err(RotationError::InvalidPolicy {
                reason: "max_backoff must not be below initial_backoff".to_string(),
            });
        }
        if self.max_attempts == Some(0) {
            return Err(RotationError::InvalidPolicy {
                reason: "max_attempts must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }

    /// Backoff before read `attempt + 2`, with ±10% jitter, capped at
    /// `max_backoff`.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_ms = self.initial_backoff.as_millis() as f32;
        let multiplier = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let backoff_ms = base_ms * multiplier;

        let jitter = rand::rng().random_range(0.9..=1.1);
        let jittered = Duration::from_millis((backoff_ms * jitter) as u64);

        jittered.min(self.max_backoff)
    }
}

/// Runs `fetch` until it returns something other than a not-found outcome.
///
/// Not-found results loop with backoff; success and every other error exit
/// immediately. Holds no locks across the suspension points.
pub(crate) async fn poll_not_found<T, F, Fut>(
    policy: &PollPolicy,
    operation: &str,
    mut fetch: F,
) -> RotationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_not_found() => {
                if let Some(max) = policy.max_attempts {
                    if attempt + 1 >= max {
                        return Err(RotationError::PollBudgetExhausted {
                            operation: operation.to_string(),
                            max_attempts: max,
                        });
                    }
                }
                let backoff = policy.backoff_duration(attempt);
                tracing::debug!(
                    operation,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "value not visible yet, backing off"
                );
                sleep(backoff).await;
                attempt = attempt.saturating_add(1);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: Option<u32>) -> PollPolicy {
        PollPolicy {
            initial_backoff: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(10),
            max_attempts,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = PollPolicy::default();

        // 100ms * 2^0 with ±10% jitter
        let first = policy.backoff_duration(0);
        assert!(first >= Duration::from_millis(90) && first <= Duration::from_millis(110));

        // 100ms * 2^2 with ±10% jitter
        let third = policy.backoff_duration(2);
        assert!(third >= Duration::from_millis(360) && third <= Duration::from_millis(440));

        // Large attempts cap at max_backoff
        assert_eq!(policy.backoff_duration(20), Duration::from_secs(5));
    }

    #[test]
    fn validate_rejects_nonsense() {
        assert!(PollPolicy::default().validate().is_ok());

        let zero = PollPolicy {
            initial_backoff: Duration::ZERO,
            ..PollPolicy::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(RotationError::InvalidPolicy { .. })
        ));

        let shrinking = PollPolicy {
            backoff_multiplier: 0.5,
            ..PollPolicy::default()
        };
        assert!(shrinking.validate().is_err());

        let inverted = PollPolicy {
            max_backoff: Duration::from_millis(1),
            ..PollPolicy::default()
        };
        assert!(inverted.validate().is_err());

        let empty_budget = PollPolicy {
            max_attempts: Some(0),
            ..PollPolicy::default()
        };
        assert!(empty_budget.validate().is_err());
    }

    #[test]
    fn policy_serde_round_trip() {
        let policy = fast_policy(Some(3));
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: PollPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_attempts, Some(3));
        assert_eq!(parsed.initial_backoff, Duration::from_millis(1));
    }

    #[tokio::test]
    async fn poll_bridges_one_not_found() {
        let calls = AtomicU32::new(0);
        let result = poll_not_found(&fast_policy(None), "get pending", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::not_found("s", "stage Pending"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn poll_does_not_retry_remote_errors() {
        let calls = AtomicU32::new(0);
        let result: RotationResult<u32> =
            poll_not_found(&fast_policy(None), "get pending", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::remote("get_value", "throttled"))
            })
            .await;

        assert!(matches!(
            result,
            Err(RotationError::Store(StoreError::Remote { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poll_budget_exhaustion() {
        let calls = AtomicU32::new(0);
        let result: RotationResult<u32> =
            poll_not_found(&fast_policy(Some(3)), "get pending", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::not_found("s", "stage Pending"))
            })
            .await;

        match result {
            Err(RotationError::PollBudgetExhausted { max_attempts, .. }) => {
                assert_eq!(max_attempts, 3);
            }
            other => panic!("expected PollBudgetExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
