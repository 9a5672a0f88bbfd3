//! Bounded retry for async operations.
//!
//! Used for artifact delivery and for retrying extraction after a network
//! failure. Attempts run back to back; callers that want a pause between
//! attempts sleep inside the operation.

use std::fmt::Display;
use std::future::Future;
use tracing::warn;

/// Result of a retried operation together with the number of attempts made.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl<T, E> Retried<T, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `op` up to `max_attempts` times.
///
/// `op` receives the 1-based attempt number. A failure is retried only while
/// attempts remain and `should_retry` accepts the error; every failure is
/// logged with its attempt number. `max_attempts` of zero is treated as one.
pub async fn retry<T, E, F, Fut, P>(max_attempts: u32, mut should_retry: P, mut op: F) -> Retried<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "Attempt failed");

                if attempt >= max_attempts || !should_retry(&e) {
                    return Retried {
                        result: Err(e),
                        attempts: attempt,
                    };
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_stops_on_first_success() {
        let calls = AtomicU32::new(0);

        let outcome = retry(3, |_: &String| true, |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("done")
        })
        .await;

        assert_eq!(outcome.result, Ok("done"));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt() {
        let outcome = retry(3, |_: &String| true, |attempt| async move {
            if attempt < 3 {
                Err(format!("attempt {attempt} failed"))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(outcome.result, Ok(3));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let outcome = retry(3, |_: &String| true, |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("nope".to_string())
        })
        .await;

        assert!(!outcome.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let outcome = retry(
            5,
            |e: &String| e.starts_with("transient"),
            |attempt| async move {
                if attempt == 1 {
                    Err::<(), _>("transient".to_string())
                } else {
                    Err("permanent".to_string())
                }
            },
        )
        .await;

        assert_eq!(outcome.result, Err("permanent".to_string()));
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let outcome = retry(0, |_: &String| true, |_| async { Err::<(), _>("x".to_string()) }).await;
        assert_eq!(outcome.attempts, 1);
    }
}
