use std::future::Future;
use tokio::time::{Duration, sleep};

const MAX_RETRIES: u32 = 3;

/// Retry an async operation on transient errors with exponential backoff.
///
/// Retries up to 3 times with delays of 200ms, 400ms, 800ms.
/// Errors for which `is_transient` is false are returned immediately.
pub async fn with_retry<T, E, F, Fut, P>(
    label: &str,
    is_transient: P,
    mut make_call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match make_call().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < MAX_RETRIES && is_transient(&e) => {
                attempt += 1;
                let delay_ms = 200 * 2u64.pow(attempt - 1);
                log::warn!(
                    "{}: {}, retrying in {}ms (attempt {}/{})",
                    label,
                    e,
                    delay_ms,
                    attempt + 1,
                    MAX_RETRIES + 1
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
