//! Bounded timeout and retry for calls to external collaborators.

use std::future::Future;
use std::time::Duration;

use crate::error::{ErrorKind, HybridError, Result};

/// Caller mistakes are never retried.
fn is_retryable(error: &HybridError) -> bool {
    !matches!(error.kind(), ErrorKind::InvalidQuery | ErrorKind::NotFound)
}

/// Run `operation` under `timeout`, retrying up to `retries` more times.
///
/// An elapsed attempt is turned into an error by `on_timeout`, which receives
/// the timeout in milliseconds. The last error is returned once attempts run out.
pub(crate) async fn with_timeout_retry<T, F, Fut, E>(
    label: &str,
    timeout: Duration,
    retries: u32,
    on_timeout: E,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    E: Fn(u64) -> HybridError,
{
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries && is_retryable(&e) => {
                attempt += 1;
                tracing::debug!(
                    "{} failed (attempt {}/{}): {}",
                    label,
                    attempt,
                    retries + 1,
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }
}
