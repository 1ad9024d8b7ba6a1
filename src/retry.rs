//! Bounded retry with exponential backoff for collaborator calls.
//!
//! Backoff schedule: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5). Only
//! errors the caller classifies as transient are retried; anything else is
//! returned on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// Run `op` up to `max_retries + 1` times.
pub async fn with_backoff<T, E, F, Fut>(
    what: &str,
    max_retries: u32,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries && is_transient(&e) => {
                attempt += 1;
                let delay = backoff_delay(attempt);
                warn!(
                    what,
                    attempt,
                    max_retries,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
