use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::warn;

use crate::db::errors::{DatabaseError, Result, Retryable};

/// Build a lazily-connecting pool. The server owns the pool as axum state and
/// hands out references; no connection is opened until first use.
pub fn build_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .min_connections(0)
        .acquire_timeout(Duration::from_secs(3))
        .idle_timeout(Duration::from_secs(10))
        .test_before_acquire(true)
        .connect_lazy(database_url)
        .map_err(|e| DatabaseError::ConnectionError(format!("Failed to create pool: {}", e)))?;

    Ok(pool)
}

/// Execute an operation with retry for transient storage failures. Each
/// attempt is all-or-nothing; partial state never survives a failed attempt.
pub async fn with_retry<F, Fut, T, E>(max_retries: u8, mut operation: F) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: Retryable,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                warn!(
                    attempt = attempt,
                    max_retries = max_retries,
                    error = %e,
                    "Retryable storage error, retrying"
                );

                // Exponential backoff with jitter
                let delay_ms =
                    (50 * 2_u64.pow(attempt as u32 - 1)).min(1000) + (jitter() % 50);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Retry limit reached");
                return Err(E::retry_limit_exceeded(max_retries));
            }
            Err(e) => return Err(e),
        }
    }
}

fn jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let mut call_count = 0;

        let result = with_retry(3, || {
            call_count += 1;
            async move {
                if call_count < 3 {
                    Err(DatabaseError::ConnectionError("test error".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retry_limit_is_enforced() {
        let result: Result<i32> = with_retry(2, || async {
            Err(DatabaseError::ConnectionError("test error".to_string()))
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            DatabaseError::RetryLimitExceeded { .. }
        ));
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let mut call_count = 0;

        let result: Result<i32> = with_retry(5, || {
            call_count += 1;
            async move { Err(DatabaseError::InvalidData("bad".to_string())) }
        })
        .await;

        assert!(matches!(result.unwrap_err(), DatabaseError::InvalidData(_)));
        assert_eq!(call_count, 1);
    }
}
