//! Small retrying helper used at the three provider boundaries (LLM call,
//! TTS call, store write).

use crate::error::{Result, ScriptcastError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Wait policy between attempts.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration },
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { base } => *base * 2u32.saturating_pow(attempt - 1),
        }
    }
}

/// Run `op` up to `attempts` times, sleeping per `backoff` between tries.
///
/// An error that fails `should_retry` is returned immediately; the last
/// error is returned once attempts are exhausted.
pub async fn retry<T, F, Fut, P>(
    attempts: u32,
    backoff: Backoff,
    should_retry: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&ScriptcastError) -> bool,
{
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = backoff.delay(attempt);
            warn!(
                "Retry attempt {}/{} after {:?} delay",
                attempt + 1,
                attempts,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }
                warn!("Attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| ScriptcastError::Provider("retry attempts exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);

        let result = retry(
            3,
            Backoff::Fixed(Duration::from_millis(1)),
            ScriptcastError::is_transient,
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ScriptcastError::Api {
                        status: 503,
                        message: "unavailable".to_string(),
                    })
                } else {
                    Ok(42)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_on_terminal_error() {
        let calls = AtomicUsize::new(0);

        let result: Result<()> = retry(
            3,
            Backoff::Fixed(Duration::from_millis(1)),
            ScriptcastError::is_transient,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScriptcastError::InvalidInput("empty".to_string()))
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicUsize::new(0);

        let result: Result<()> = retry(
            3,
            Backoff::Exponential {
                base: Duration::from_millis(1),
            },
            ScriptcastError::is_transient,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScriptcastError::Provider("flaky".to_string()))
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
