use std::{
    fmt::Display,
    future::Future,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::time::{sleep, timeout as bounded};
use tracing::trace;

#[derive(Debug, Error)]
#[error("timed out after {timeout:?} waiting for {description}{}", last_error_suffix(.last_error))]
pub struct PollError {
    pub description: String,
    pub timeout: Duration,
    /// The most recent transient error reported by the condition, if any.
    pub last_error: Option<String>,
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|error| format!(" (last error: {error})"))
        .unwrap_or_default()
}

/// Polls `condition` every `interval` until it yields a value or `timeout`
/// elapses.
///
/// `Ok(None)` means "not yet". Errors are treated as transient: they are
/// traced and remembered for the timeout report, but polling continues. An
/// attempt still pending at the deadline is abandoned.
pub async fn wait_for<F, Fut, T, E>(
    description: &str,
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut last_error = None;
    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        match bounded(remaining, condition()).await {
            Ok(Ok(Some(value))) => return Ok(value),
            Ok(Ok(None)) => {}
            Ok(Err(error)) => {
                trace!("polling for '{description}' received transient error: {error}");
                last_error = Some(error.to_string());
            }
            Err(_) => {
                last_error.get_or_insert_with(|| "attempt did not complete".to_owned());
            }
        }
        if start.elapsed() >= timeout {
            return Err(PollError {
                description: description.to_owned(),
                timeout,
                last_error,
            });
        }
        sleep(interval.min(timeout.saturating_sub(start.elapsed()))).await;
    }
}
