//! Caller-side retry for contended tree mutations.
//!
//! The tree store never waits for a lock: a colliding mutation fails at once
//! with a retryable error. This helper is the single place that turns those
//! failures into bounded, exponentially backed-off retries.

use std::thread;

use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{SdkError, SdkResult};

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned as is.
pub fn retry_on_contention<T, E, F>(policy: &RetryPolicy, mut op: F) -> SdkResult<T>
where
    E: Into<SdkError>,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 1u32;
    loop {
        match op().map_err(Into::into) {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let backoff = policy.backoff_after(attempt);
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "retrying after contention");
                thread::sleep(backoff);
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(attempts = attempt, error = %err, "giving up after contention");
                }
                return Err(err);
            }
            Ok(value) => return Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gallery_tree::TreeError;
    use gallery_types::GalleryId;

    fn contention() -> TreeError {
        TreeError::Contention {
            gallery: GalleryId::new(),
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    #[test]
    fn succeeds_after_transient_contention() {
        let mut calls = 0;
        let value = retry_on_contention(&fast(5), || {
            calls += 1;
            if calls < 3 {
                Err(contention())
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let err = retry_on_contention(&fast(4), || -> Result<(), _> {
            calls += 1;
            Err(contention())
        })
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls, 4);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let err = retry_on_contention(&fast(5), || -> Result<(), _> {
            calls += 1;
            Err(TreeError::NodeNotFound(GalleryId::new()))
        })
        .unwrap_err();
        assert!(matches!(err, SdkError::Tree(TreeError::NodeNotFound(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_backoff_policy_still_sleeps_between_attempts() {
        let started = std::time::Instant::now();
        let mut calls = 0;
        let _ = retry_on_contention(&fast(6), || -> Result<(), _> {
            calls += 1;
            Err(contention())
        });
        assert_eq!(calls, 6);
        // Five waits of at least one millisecond each.
        assert!(started.elapsed() >= crate::config::MIN_BACKOFF * 5);
    }

    #[test]
    fn single_attempt_policy_does_not_retry() {
        let mut calls = 0;
        let _ = retry_on_contention(&RetryPolicy::no_retry(), || -> Result<(), _> {
            calls += 1;
            Err(contention())
        });
        assert_eq!(calls, 1);
    }
}
