//! Poll-retry engine.
//!
//! This module provides:
//! - Retry policies as plain values (`RetryConfig`, `RetryProfiles`)
//! - `wait_for_expected`, the bounded, cancellable poll loop
//! - Stock classifiers for provider error codes

mod config;
mod wait;

pub use config::{
    BackoffStrategy, JitterStrategy, RetryConfig, RetryProfiles, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RETRY_TIMES, LONG_RETRY_TIMES, PRIVATE_IP_RETRY_TIMES, SHORT_RETRY_TIMES,
};
pub use wait::{retry_on_any_error, retry_on_codes, wait_for_expected, WaitResult};
