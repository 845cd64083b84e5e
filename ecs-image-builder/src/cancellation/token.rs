//! Cancellation token for operator interrupts.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A token for cooperative cancellation of a build.
///
/// Cancellation is idempotent: only the first reason is kept. Poll loops
/// either check [`is_cancelled`](Self::is_cancelled) between attempts or
/// race their sleep against [`cancelled`](Self::cancelled).
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    /// First reason wins.
    reason: RwLock<Option<String>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason and wakes every waiter.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let reason = reason.into();
        tracing::info!(reason = %reason, "Cancellation requested");
        *self.reason.write() = Some(reason);
        self.notify.notify_waiters();
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking the flag so a concurrent
            // cancel() between the two cannot be missed.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("interrupt");
        token.cancel("terminate");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("interrupt".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel("done");
        token.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wakes_waiter() {
        let token = Arc::new(CancellationToken::new());
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        token.cancel("interrupt");
        tokio_test::assert_ok!(waiter.await);
    }
}
