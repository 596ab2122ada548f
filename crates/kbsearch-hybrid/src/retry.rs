use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use kbsearch_core::config::BackendSettings;
use kbsearch_core::{Backend, Error, Result};

/// Per-call timeout plus bounded retries with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&BackendSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.timeout_ms),
            max_retries: settings.max_retries,
            backoff: Duration::from_millis(settings.backoff_ms),
        }
    }

    pub fn no_retry(timeout: Duration) -> Self {
        Self { timeout, max_retries: 0, backoff: Duration::ZERO }
    }

    /// Delay before retry number `attempt` (1-based): `backoff * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Runs `op` under `policy`; exhausting the attempts yields `BackendUnavailable`.
/// A reply that failed to parse (`Error::Parse`) is returned at once, unretried.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    backend: Backend,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_err = String::new();
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            debug!(%backend, attempt, delay_ms = delay.as_millis() as u64, "retrying backend call");
            tokio::time::sleep(delay).await;
        }
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                if let Some(Error::Parse(msg)) = e.downcast_ref::<Error>() {
                    warn!(%backend, attempt, error = %msg, "backend reply unusable");
                    return Err(Error::Parse(msg.clone()));
                }
                warn!(%backend, attempt, error = %format!("{e:#}"), "backend call failed");
                last_err = format!("{e:#}");
            }
            Err(_) => {
                let timeout_ms = policy.timeout.as_millis() as u64;
                warn!(%backend, attempt, timeout_ms, "backend call timed out");
                last_err = format!("timed out after {}ms", policy.timeout.as_millis());
            }
        }
    }
    Err(Error::backend(backend, format!("{last_err} (after {} attempts)", policy.max_retries + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy { timeout: Duration::from_millis(50), max_retries, backoff: Duration::from_millis(1) }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy { timeout: Duration::from_secs(1), max_retries: 3, backoff: Duration::from_millis(100) };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let out = call_with_retry(&policy(2), Backend::VectorStore, move || async move {
            if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("transient");
            }
            Ok(7)
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_backend_unavailable() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let err = call_with_retry(&policy(1), Backend::RerankModel, move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("down"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");
        assert!(err.to_string().contains("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn parse_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let err = call_with_retry(&policy(3), Backend::RerankModel, move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::Parse("no JSON in reply".into()).into())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "parse");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let err = call_with_retry(&policy(0), Backend::ClassifierModel, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }
}
