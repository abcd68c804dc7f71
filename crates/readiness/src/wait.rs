//! Poll-until-true waiter

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Errors returned by the waiters
#[derive(Debug, Error)]
pub enum WaitError {
    /// The condition did not hold before the deadline
    #[error("timed out after {waited:?} waiting for {what}{}", error_suffix(.last_error))]
    Timeout {
        what: String,
        waited: Duration,
        last_error: Option<String>,
    },
}

fn error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(" (last error: {})", e))
        .unwrap_or_default()
}

/// Timeout and poll interval of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20 * 60),
            interval: Duration::from_secs(10),
        }
    }
}

impl WaitOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Polls `fetch` until it yields an object satisfying `predicate`.
///
/// `Ok(None)` from `fetch` means the object does not exist (yet). Fetch
/// errors are retried until the deadline; the last one is reported in the
/// timeout error.
pub async fn wait_for<T, E, F, Fut, P>(
    what: &str,
    options: WaitOptions,
    mut fetch: F,
    predicate: P,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let mut last_error = None;
    loop {
        match fetch().await {
            Ok(Some(obj)) if predicate(&obj) => return Ok(obj),
            Ok(_) => debug!("Still waiting for {}", what),
            Err(e) => {
                debug!("Error while waiting for {}: {}", what, e);
                last_error = Some(e.to_string());
            }
        }
        if start.elapsed() + options.interval > options.timeout {
            return Err(WaitError::Timeout {
                what: what.to_string(),
                waited: start.elapsed(),
                last_error,
            });
        }
        tokio::time::sleep(options.interval).await;
    }
}

/// Polls `fetch` until the object no longer exists
pub async fn wait_until_gone<T, E, F, Fut>(
    what: &str,
    options: WaitOptions,
    mut fetch: F,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    // Map "gone" onto a value so the generic loop can return it
    wait_for(
        what,
        options,
        || {
            let fut = fetch();
            async move { fut.await.map(|obj| Some(obj.is_none())) }
        },
        |gone| *gone,
    )
    .await
    .map(|_| ())
}
