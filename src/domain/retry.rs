//! Bounded retries for sensor operations.
//!
//! The radio link drops exchanges routinely, so every public operation has
//! a retrying variant. Attempts run back to back without backoff and the
//! last error is returned exactly as the operation produced it.

use crate::error::{Result, SensorError};
use std::future::Future;
use tracing::{debug, warn};

/// Run `operation` up to `max_attempts` times.
pub async fn with_retries<T, F, Fut>(max_attempts: u32, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    resume_with_retries(max_attempts, None, operation).await
}

/// Continue retrying after an earlier failure.
///
/// With no attempts left the carried error is returned untouched and
/// `operation` is never called.
pub async fn resume_with_retries<T, F, Fut>(
    attempts_left: u32,
    carried: Option<SensorError>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = carried;
    for attempt in 1..=attempts_left {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Succeeded on attempt {}/{}", attempt, attempts_left);
                }
                return Ok(value);
            }
            Err(e) => {
                warn!("Attempt {}/{} failed: {}", attempt, attempts_left, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or(SensorError::NoAttempts))
}
