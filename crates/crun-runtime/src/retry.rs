//! Exponential backoff for idempotent transport failures.
//!
//! Only `TransportError::{Timeout, ConnectionReset}` are ever retried;
//! everything else fails the attempt loop immediately. The orchestrator
//! is the single retrying layer in the system.

use crun_docker::DockerError;
use crun_types::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Backoff before retry number `retry` (1-based): exponential from
    /// the base, capped, with a random fraction jittered away so
    /// concurrent retries spread out.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .config
            .base_delay
            .saturating_mul(1u32 << (retry - 1).min(16));
        let capped = exp.min(self.config.max_delay);
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return capped;
        }
        let scale = 1.0 - jitter * rand::random::<f64>();
        capped.mul_f64(scale)
    }
}

/// Why the attempt loop stopped without a value.
#[derive(Debug)]
pub(crate) enum RetryError {
    /// Retryable failures exhausted the attempt limit.
    Exhausted(DockerError),
    /// Non-retryable failure; surfaced as-is.
    Fatal(DockerError),
    /// The caller's token fired; the in-flight call was aborted.
    Cancelled,
}

/// Run `call` until it succeeds, a non-retryable error occurs, the
/// attempt limit is reached or the token fires. On success also returns
/// the number of retries that were needed.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut call: F,
) -> Result<(T, u32), RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crun_docker::Result<T>>,
{
    let mut retries = 0u32;
    loop {
        // Biased so a fired token wins over an already-ready attempt.
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = call() => result,
        };
        match result {
            Ok(value) => return Ok((value, retries)),
            Err(e) if e.is_retryable_transport() => {
                retries += 1;
                if retries >= policy.max_attempts() {
                    return Err(RetryError::Exhausted(e));
                }
                let delay = policy.delay_for(retries);
                debug!("{} failed ({}), retry {} in {:?}", what, e, retries, delay);
                tokio::select! {
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(RetryError::Fatal(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crun_docker::TransportError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            jitter: 0.0,
        })
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = policy(10);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8));
        // Capped from here on.
        assert_eq!(policy.delay_for(7), Duration::from_millis(8));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.5,
        });
        for _ in 0..100 {
            let d = policy.delay_for(1);
            assert!(d <= Duration::from_millis(100));
            assert!(d >= Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_resets() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let (value, retries) = with_retry(&policy(5), &cancel, "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DockerError::Transport(TransportError::ConnectionReset))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn exhausts_at_attempt_limit() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let err = with_retry::<u32, _, _>(&policy(3), &cancel, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DockerError::Transport(TransportError::Timeout)) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Exhausted(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn api_errors_are_fatal_immediately() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let err = with_retry::<u32, _, _>(&policy(5), &cancel, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DockerError::api(500, "boom")) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Fatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_fired_token_cancels_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = with_retry::<u32, _, _>(&policy(5), &cancel, "op", || async {
            Ok(1)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Cancelled));
    }
}
