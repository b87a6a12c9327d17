//! Request deadlines and cancellation.
//!
//! A [`Context`] travels with every blocking call. [`Context::run`] races the
//! call against the deadline and the cancel signal; the losing future is
//! dropped, which is what releases watch registrations and abandons commits
//! that have not reached the store.

use crate::core::error::{KvError, KvResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation scope for a request.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Trigger side of a cancelable [`Context`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every context derived from this handle.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Context {
    /// A context that never expires and cannot be canceled.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: None,
        }
    }

    /// A context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// A cancelable context and its trigger.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            deadline: None,
            cancel: Some(rx),
        };
        (ctx, CancelHandle { tx })
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let at = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < at => existing,
            _ => at,
        });
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check whether the context is already done, without waiting.
    pub fn err(&self) -> Option<KvError> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(KvError::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(KvError::DeadlineExceeded);
        }
        None
    }

    /// Run `fut` to completion unless the context finishes first.
    pub async fn run<F, T>(&self, fut: F) -> KvResult<T>
    where
        F: Future<Output = KvResult<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let mut cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = wait_canceled(cancel.as_mut()) => Err(KvError::Canceled),
            _ = wait_deadline(self.deadline) => Err(KvError::DeadlineExceeded),
            res = fut => res,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn wait_canceled(rx: Option<&mut watch::Receiver<bool>>) {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Handle dropped without canceling.
            return std::future::pending().await;
        }
    }
}
