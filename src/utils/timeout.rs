//! Timeout helpers for socket operations.
//!
//! Timeouts apply per socket operation, not per logical request.

use crate::error::{MiioError, Result};
use std::future::Future;
use std::time::Duration;

/// Default wait for a single reply
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default number of retransmissions after the first attempt
pub const DEFAULT_RETRIES: u32 = 2;

/// Run `fut`, mapping an elapsed deadline to [`MiioError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(MiioError::Timeout),
    }
}

/// Upper bound for one logical operation: `timeout × (retries + 1)`.
pub fn operation_budget(timeout: Duration, retries: u32) -> Duration {
    timeout.saturating_mul(retries.saturating_add(1))
}
