//! Contracts exposed by every streamed component.

use std::time::Duration;

use async_trait::async_trait;

use crate::transaction::TransactionReceiver;
use streamforge_types::TransportError;

/// Two-phase close: signal intent, then wait for the drain.
#[async_trait]
pub trait Closable: Send + Sync {
    /// Signal intent to close. Non-blocking; calling it any number of
    /// times is a no-op after the first and must never panic.
    fn close_async(&self);

    /// Wait until the component has drained and released its connector,
    /// or fail with [`TransportError::Timeout`] once `timeout` elapses.
    ///
    /// A compound component returns success only after all of its
    /// children have.
    async fn wait_for_close(&self, timeout: Duration) -> Result<(), TransportError>;
}

/// A component that consumes a transaction channel.
pub trait Streamed: Closable {
    /// Start processing transactions from `rx`. Callable once; a second
    /// call fails with [`TransportError::AlreadyStarted`].
    fn consume(&mut self, rx: TransactionReceiver) -> Result<(), TransportError>;
}
