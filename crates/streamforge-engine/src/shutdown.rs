//! Two-phase shutdown signalling.
//!
//! A component holds a [`Shutdown`] and hands the matching
//! [`ShutdownWatcher`] to its task. `close_async` flips the closing flag
//! (idempotent, non-blocking); the task observes it, drains, and marks
//! the closed flag by dropping the watcher's guard — which also fires if
//! the task panics, so `wait_for_close` can never hang on a dead task.

use std::time::Duration;

use tokio::sync::watch;

use streamforge_types::TransportError;

/// Shutdown handle kept by the component.
#[derive(Debug)]
pub struct Shutdown {
    closing: watch::Sender<bool>,
    closed: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a shutdown handle and the watcher for the component's task.
    #[must_use]
    pub fn new() -> (Self, ShutdownWatcher) {
        let (closing_tx, closing_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);
        (
            Self {
                closing: closing_tx,
                closed: closed_rx,
            },
            ShutdownWatcher {
                closing: closing_rx,
                _guard: ClosedGuard { closed: closed_tx },
            },
        )
    }

    /// Signal intent to close. Non-blocking, idempotent.
    pub fn close_async(&self) {
        self.closing.send_replace(true);
    }

    /// Returns `true` once `close_async` has been called.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Wait until the task has fully drained and exited, or the deadline
    /// elapses with [`TransportError::Timeout`].
    pub async fn wait_for_close(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut closed = self.closed.clone();
        tokio::time::timeout(timeout, closed.wait_for(|done| *done))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|_| TransportError::TypeClosed)?;
        Ok(())
    }
}

/// Task-side view of the shutdown signal.
///
/// Dropping the watcher (normally, at the end of the task) marks the
/// component closed.
#[derive(Debug)]
pub struct ShutdownWatcher {
    closing: watch::Receiver<bool>,
    _guard: ClosedGuard,
}

impl ShutdownWatcher {
    /// Resolves once `close_async` has been called.
    pub async fn closing(&mut self) {
        let _ = self.closing.wait_for(|closing| *closing).await;
    }

    /// Returns `true` once `close_async` has been called.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// A plain receiver of the closing flag, for sub-tasks of the
    /// component (worker pool members, walk tasks).
    #[must_use]
    pub fn signal(&self) -> watch::Receiver<bool> {
        self.closing.clone()
    }
}

#[derive(Debug)]
struct ClosedGuard {
    closed: watch::Sender<bool>,
}

impl Drop for ClosedGuard {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

/// Await the closing flag on a receiver handed out by
/// [`ShutdownWatcher::signal`].
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closing| *closing).await;
}
