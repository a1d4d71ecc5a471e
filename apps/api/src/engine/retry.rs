//! Small bounded-retry helpers shared by the pipeline's retry loops.
//!
//! Each loop in the engine (extractor reask, deadlock retry) has a fixed
//! budget and must record how it ended; centralising the counting keeps the
//! budgets auditable in one place.

use std::future::Future;
use tracing::warn;

/// Outcome of a bounded retry loop, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    /// 1-based attempt number that succeeded, or the budget if all failed.
    pub attempts: usize,
    pub succeeded: bool,
}

/// Runs `op` up to `budget` times, passing the attempt index (0-based).
/// Returns the first success together with its outcome, or the last error.
pub async fn bounded<T, E, F, Fut>(
    budget: usize,
    label: &str,
    mut op: F,
) -> (Result<T, E>, RetryOutcome)
where
    E: std::fmt::Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    debug_assert!(budget > 0);
    let mut last_err: Option<E> = None;

    for attempt in 0..budget {
        match op(attempt).await {
            Ok(value) => {
                return (
                    Ok(value),
                    RetryOutcome {
                        attempts: attempt + 1,
                        succeeded: true,
                    },
                )
            }
            Err(e) => {
                if attempt + 1 < budget {
                    warn!("{label}: attempt {}/{} failed: {e}", attempt + 1, budget);
                }
                last_err = Some(e);
            }
        }
    }

    (
        Err(last_err.expect("budget > 0 guarantees at least one attempt")),
        RetryOutcome {
            attempts: budget,
            succeeded: false,
        },
    )
}

/// Returns true when an sqlx error is a serialization/deadlock failure worth
/// retrying once.
pub fn is_serialization_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            // 40001 serialization_failure, 40P01 deadlock_detected
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_bounded_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let (result, outcome) = bounded(3, "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 1 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bounded_exhausts_budget() {
        let calls = AtomicUsize::new(0);
        let (result, outcome): (Result<(), &str>, _) = bounded(3, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bounded_single_attempt() {
        let (result, outcome): (Result<u32, &str>, _) =
            bounded(1, "test", |_| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(outcome.attempts, 1);
    }
}
