//! Poll-and-retry primitives shared by the pipeline stages.
//!
//! The upstream portal offers no events or webhooks; every readiness
//! question ("has the CAPTCHA rendered?", "has the outcome text appeared?",
//! "is the record data real yet?") is answered by polling the DOM with an
//! explicit deadline. Nothing in the pipeline spins unbounded.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Poll `probe` every `interval` until it yields a value or `deadline`
/// elapses. The probe always runs at least once, so a zero deadline still
/// observes the current state.
pub async fn poll_until<T, F, Fut>(interval: Duration, deadline: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    loop {
        if let Some(v) = probe().await {
            return Some(v);
        }
        if start.elapsed() >= deadline {
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Result of a bounded [`retry`]: either the action completed, or every
/// attempt failed and the last error is carried out.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Completed(T),
    Exhausted(E),
}

impl<T, E> RetryOutcome<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Completed(v) => Ok(v),
            RetryOutcome::Exhausted(e) => Err(e),
        }
    }
}

/// Run `action` up to `attempts` times with a fixed `pause` between
/// attempts. The 1-based attempt number is passed in for logging.
///
/// `attempts` is clamped to at least 1.
pub async fn retry<T, E, F, Fut>(attempts: u32, pause: Duration, mut action: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match action(attempt).await {
            Ok(v) => return RetryOutcome::Completed(v),
            Err(e) => {
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
    RetryOutcome::Exhausted(last_err.expect("at least one attempt ran"))
}
