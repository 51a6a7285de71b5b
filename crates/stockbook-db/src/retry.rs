//! Bounded retry with exponential backoff for transient failures
//! (`ScopeLocked`, SQLite busy, pool exhaustion).

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use tracing::{debug, warn};

use crate::config::LockSettings;
use crate::error::DbResult;

/// Creates the exponential backoff configuration.
pub fn create_backoff(settings: &LockSettings) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: settings.initial_backoff(),
        max_interval: settings.max_backoff(),
        multiplier: 2.0,
        max_elapsed_time: None, // bounded by max_retries instead
        ..Default::default()
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries have been spent. The last error is returned.
pub async fn retry_transient<T, F, Fut>(
    settings: &LockSettings,
    operation: &str,
    mut attempt: F,
) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let mut backoff = create_backoff(settings);
    let mut retries = 0u32;

    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retries < settings.max_retries => {
                retries += 1;
                let delay = backoff.next_backoff().unwrap_or_else(|| settings.max_backoff());
                debug!(operation, retries, ?delay, error = %err, "Transient failure, backing off");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(operation, retries, error = %err, "Giving up after retries");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> LockSettings {
        LockSettings {
            lock_wait_ms: 10,
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_transient(&fast(), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DbError::Busy("database is locked".into()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: DbResult<()> = retry_transient(&fast(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DbError::Busy("database is locked".into()))
        })
        .await;

        assert!(matches!(result, Err(DbError::Busy(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_does_not_retry_business_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: DbResult<()> = retry_transient(&fast(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DbError::Config("nope".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
