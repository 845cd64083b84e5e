//! The poll-retry loop that turns "request accepted" into "operation done".

use std::future::Future;

use tokio::time::Instant;

use super::RetryConfig;
use crate::cancellation::CancellationToken;
use crate::errors::{ProviderError, WaitError};

/// Classification of one attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The response is what we were waiting for.
    Success,
    /// Not there yet, or a transient error; try again.
    Retry,
    /// Give up immediately.
    Fail,
}

/// Issues `request` until `eval` accepts a response, rejects it, or the
/// retry budget in `config` runs out.
///
/// Only `Ok` responses can be accepted: a `Success` verdict on an error is
/// reported as [`WaitError::Failed`], and a `Fail` verdict on a successful
/// response as [`WaitError::Rejected`]. Cancellation is checked before every
/// attempt and while sleeping between attempts; pass `None` from cleanup
/// paths that must run to completion even after the build was cancelled.
pub async fn wait_for_expected<T, F, Fut, E>(
    config: &RetryConfig,
    cancel: Option<&CancellationToken>,
    mut request: F,
    mut eval: E,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
    E: FnMut(&Result<T, ProviderError>) -> WaitResult,
{
    let max_attempts = config.max_attempts.max(1);
    let deadline = config.timeout().map(|t| Instant::now() + t);
    let mut last_error = None;
    let mut attempts = 0;

    while attempts < max_attempts {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(WaitError::Cancelled);
        }

        let response = request().await;
        attempts += 1;

        match eval(&response) {
            WaitResult::Success => {
                return response.map_err(WaitError::Failed);
            }
            WaitResult::Fail => {
                return Err(match response {
                    Err(e) => WaitError::Failed(e),
                    Ok(_) => WaitError::Rejected { attempts },
                });
            }
            WaitResult::Retry => {
                if let Err(e) = response {
                    last_error = Some(e);
                }
            }
        }

        if attempts >= max_attempts {
            break;
        }

        let delay = config.delay_for(attempts - 1);
        if deadline.is_some_and(|d| Instant::now() + delay > d) {
            break;
        }

        tracing::debug!(
            attempt = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            last_error = ?last_error,
            "Expected state not reached, retrying"
        );

        match cancel {
            Some(token) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = token.cancelled() => return Err(WaitError::Cancelled),
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }

    Err(WaitError::Timeout {
        attempts,
        last_error,
    })
}

/// Accepts any successful response and retries errors whose code is in
/// `codes`; every other error is fatal.
///
/// Used for submissions that can hit a transient token or idempotency
/// conflict on their first attempt.
pub fn retry_on_codes<T>(
    codes: &'static [&'static str],
) -> impl FnMut(&Result<T, ProviderError>) -> WaitResult {
    move |response| match response {
        Ok(_) => WaitResult::Success,
        Err(e) if e.has_code_in(codes) => WaitResult::Retry,
        Err(_) => WaitResult::Fail,
    }
}

/// Accepts any successful response and retries every error.
pub fn retry_on_any_error<T>(response: &Result<T, ProviderError>) -> WaitResult {
    if response.is_ok() {
        WaitResult::Success
    } else {
        WaitResult::Retry
    }
}
