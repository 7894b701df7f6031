//! Bounded retry for transient store failures.

use crate::infrastructure::store::StoreError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy: fixed attempt count with linear backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Duration::from_millis(backoff_ms),
        }
    }
}

/// Run `op`, retrying only on [`StoreError::Unavailable`].
///
/// Guard failures are never retried here: they are real conflicts the
/// caller must resolve (re-fetch and retry, or surface to the user).
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(StoreError::Unavailable(reason)) if attempt < policy.attempts => {
                warn!(attempt, %reason, "transient store failure, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
