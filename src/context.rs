//! Call context: deadline, oneway marker and cancellation
//!
//! Travels with every client call and is rebuilt on the server from the
//! request metadata before the handler runs.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::watch;

/// Why a context is done
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Observes a [`CancelHandle`] and the handles of every context it was
/// derived from
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Resolves once this token or any ancestor is cancelled; pends forever
    /// if every handle is dropped first
    pub fn cancelled(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let Self { rx, parent } = self;
        Box::pin(async move {
            match parent {
                Some(parent) => {
                    tokio::select! {
                        _ = wait_for_cancel(rx) => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => wait_for_cancel(rx).await,
            }
        })
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow_and_update() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow_and_update() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Cancels the context it was created with and every context cloned or
/// derived from it
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Per-call context
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<SystemTime>,
    oneway: bool,
    cancel: Option<CancellationToken>,
}

impl CallContext {
    /// A context with no deadline that is never cancelled
    pub fn background() -> Self {
        Self::default()
    }

    /// Bound the call by `deadline`; an earlier existing deadline wins
    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(SystemTime::now() + timeout)
    }

    /// Mark the call as fire-and-forget
    pub fn oneway(mut self) -> Self {
        self.oneway = true;
        self
    }

    /// Attach a fresh cancellation signal. Cancelling a context this one
    /// was derived from still cancels it.
    pub fn with_cancellation(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(CancellationToken {
            rx,
            parent: self.cancel.take().map(Box::new),
        });
        (self, CancelHandle { tx })
    }

    pub fn deadline(&self) -> Option<SystemTime> {
        self.deadline
    }

    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    /// Time left before the deadline (zero once it has passed)
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| {
            deadline
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Why the context is done, or None while it is still live
    pub fn error(&self) -> Option<ContextError> {
        if self.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the context is cancelled or its deadline passes
    pub async fn done(&self) -> ContextError {
        let remaining = self.remaining();
        let deadline = async move {
            match remaining {
                Some(remaining) => tokio::time::sleep(remaining).await,
                None => std::future::pending().await,
            }
        };

        let token = self.cancel.clone();
        let cancelled = async move {
            match token {
                Some(mut token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancelled => ContextError::Cancelled,
            _ = deadline => ContextError::DeadlineExceeded,
        }
    }
}
