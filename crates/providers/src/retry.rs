//! Bounded retry for provider calls.

use std::future::Future;
use std::time::Duration;

use cg_domain::error::Result;
use cg_domain::trace::TraceEvent;

const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 10_000;

/// Run `op` up to `attempts` times, retrying only on
/// [`Error::is_retriable`](cg_domain::error::Error::is_retriable) failures.
///
/// Backoff doubles from 250ms, capped at 10s. Non-retriable errors (auth, validation,
/// 4xx) return immediately.
pub async fn with_retry<T, F, Fut>(attempts: u32, provider: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts && e.is_retriable() => {
                TraceEvent::LlmRetry {
                    provider: provider.to_owned(),
                    attempt,
                    reason: e.to_string(),
                }
                .emit();
                tokio::time::sleep(backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Delay after the `attempt`-th failure (1-based).
fn backoff(attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = with_retry(3, "openai", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::Timeout("slow".into()))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let err = with_retry(3, "openai", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::Http("reset".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let _ = with_retry(3, "anthropic", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::Auth("bad key".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff(1), Duration::from_millis(250));
        assert_eq!(backoff(2), Duration::from_millis(500));
        assert_eq!(backoff(6), Duration::from_millis(8000));
        assert_eq!(backoff(7), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff(65), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff(u32::MAX), Duration::from_millis(MAX_BACKOFF_MS));
    }
}
