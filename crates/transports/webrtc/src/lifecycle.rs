//! Connection lifecycle: cancellation scope, terminal failure and close-once
//!
//! Every adapter and listener owns one [`Lifecycle`]. Blocking operations race
//! their work against [`Lifecycle::cancelled`], so closing (or a failed
//! handshake) wakes every parked caller.

use crate::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use tokio::sync::{watch, OnceCell};
use tracing::debug;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Usable (the data channel may still be negotiating)
    Open,
    /// Close in progress
    Closing,
    /// Torn down; never reopens
    Closed,
}

pub(crate) struct Lifecycle {
    id: String,
    state: AtomicU8,
    failure: OnceLock<Error>,
    cancel: watch::Sender<bool>,
    close_result: OnceCell<Result<()>>,
}

impl Lifecycle {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id: id.into(),
            state: AtomicU8::new(OPEN),
            failure: OnceLock::new(),
            cancel,
            close_result: OnceCell::new(),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            OPEN => LifecycleState::Open,
            CLOSING => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Trigger the cancellation scope without tearing anything down
    pub(crate) fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Resolves once the scope is cancelled
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives as long as `self`, so this only errors on teardown.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Record a terminal failure and cancel the scope
    ///
    /// Only the first failure is kept. Returns `false` if one was already set.
    pub(crate) fn fail(&self, err: Error) -> bool {
        let reason = err.to_string();
        let first = self.failure.set(err).is_ok();
        if first {
            debug!(id = %self.id, %reason, "lifecycle failed");
        }
        self.cancel();
        first
    }

    /// Error handed to operations that lost the race against cancellation
    ///
    /// A closed scope always reports `ConnectionClosed`; an open one that was
    /// failed reports the stored failure.
    pub(crate) fn terminal_error(&self) -> Error {
        if self.state() != LifecycleState::Open {
            return Error::ConnectionClosed;
        }
        self.failure
            .get()
            .cloned()
            .unwrap_or(Error::ConnectionClosed)
    }

    /// Fail fast if the scope is already cancelled
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(self.terminal_error())
        } else {
            Ok(())
        }
    }

    /// Fail fast only if the scope was closed (failures are left to the caller)
    pub(crate) fn check_not_closed(&self) -> Result<()> {
        if self.state() == LifecycleState::Open {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// Run `teardown` exactly once
    ///
    /// Concurrent callers wait for the first teardown and all observe its
    /// result. The state is `Closed` afterwards whatever the result.
    pub(crate) async fn close_once<F, Fut>(&self, teardown: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.close_result
            .get_or_init(|| async {
                let _ = self
                    .state
                    .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire);
                self.cancel();
                debug!(id = %self.id, "closing");
                let result = teardown().await;
                self.state.store(CLOSED, Ordering::Release);
                debug!(id = %self.id, ok = result.is_ok(), "closed");
                result
            })
            .await
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let lifecycle = Arc::new(Lifecycle::new("test"));
        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        lifecycle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_already_cancelled() {
        let lifecycle = Lifecycle::new("test");
        lifecycle.cancel();
        tokio::time::timeout(Duration::from_millis(100), lifecycle.cancelled())
            .await
            .expect("already cancelled");
    }

    #[test]
    fn test_first_failure_wins() {
        let lifecycle = Lifecycle::new("test");
        assert!(lifecycle.fail(Error::HandshakeFailed("first".to_string())));
        assert!(!lifecycle.fail(Error::HandshakeFailed("second".to_string())));

        match lifecycle.terminal_error() {
            Error::HandshakeFailed(reason) => assert_eq!(reason, "first"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(lifecycle.check().is_err());
        assert!(lifecycle.check_not_closed().is_ok());
    }

    #[tokio::test]
    async fn test_close_reports_closed_over_failure() {
        let lifecycle = Lifecycle::new("test");
        lifecycle.fail(Error::HandshakeFailed("boom".to_string()));
        lifecycle.close_once(|| async { Ok(()) }).await.unwrap();

        assert!(matches!(lifecycle.terminal_error(), Error::ConnectionClosed));
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn test_close_once_runs_teardown_once() {
        let lifecycle = Arc::new(Lifecycle::new("test"));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lifecycle = Arc::clone(&lifecycle);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                lifecycle
                    .close_once(|| async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Err(Error::DataChannelError("teardown".to_string()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Err(Error::DataChannelError(_))));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert!(lifecycle.is_cancelled());
    }
}
