//! Cooperative cancellation of a running build.
//!
//! The token is shared between the operator (who cancels) and the steps
//! and poll loops (who observe). Reverse-order cleanup is the runner's job.

mod token;

pub use token::CancellationToken;
