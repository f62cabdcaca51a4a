//! Fixed-count retry policy.

use std::future::Future;

/// Run `operation` up to `attempts` times, returning the first success or the
/// last error. Attempts run back to back with no delay; `attempts == 0` is
/// treated as a single attempt.
///
/// The operation receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(attempts: u32, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err(err),
            Err(_) => attempt += 1,
        }
    }
}
