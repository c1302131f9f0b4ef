//! Async connector traits.
//!
//! [`Input`] and [`Output`] are the blocking pull/push connector contracts
//! the transport adapters lift into channels. Both are object-safe; the
//! engine owns each instance exclusively inside one task, so connection
//! state transitions are serialized by `&mut self` rather than a lock.
//!
//! Cancellation is structural: connector futures must tolerate being
//! dropped at any await point, and callers apply deadlines with
//! `tokio::time::timeout` where one is required.

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use streamforge_types::{Ack, MessageBatch, TransportError};

/// Future returned by an acknowledgement continuation.
pub type AckFuture = BoxFuture<'static, Result<(), TransportError>>;

/// One-shot acknowledgement continuation captured at read time.
///
/// Holds whatever connector-side state the ack needs (a source message
/// handle, an offset to commit). Invoked exactly once per emitted batch,
/// including during shutdown drain.
pub type AckFn = Box<dyn FnOnce(Ack) -> AckFuture + Send>;

/// Wrap an async closure as an [`AckFn`].
pub fn ack_fn<F, Fut>(f: F) -> AckFn
where
    F: FnOnce(Ack) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), TransportError>> + Send + 'static,
{
    Box::new(move |ack| Box::pin(f(ack)))
}

/// An [`AckFn`] that discards the outcome. For inputs with nothing to
/// commit.
#[must_use]
pub fn noop_ack_fn() -> AckFn {
    ack_fn(|_| async { Ok(()) })
}

/// A pull-style input connector.
#[async_trait]
pub trait Input: Send + Sync {
    /// Establish the connection. Returns [`TransportError::EndOfInput`]
    /// if the input was constructed with nothing to offer.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Pull the next batch along with its acknowledgement continuation.
    ///
    /// Sentinels: [`TransportError::NotConnected`] asks the caller to
    /// reconnect, [`TransportError::EndOfInput`] signals exhaustion,
    /// [`TransportError::Timeout`] asks for a plain retry.
    async fn read(&mut self) -> Result<(MessageBatch, AckFn), TransportError>;

    /// Release the connection. Called once, after the caller has drained
    /// outstanding acks.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A push-style output connector.
#[async_trait]
pub trait Output: Send {
    /// Establish the connection.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Write one batch. The transport layer never mutates `batch`; a
    /// sparse per-index failure is reported as
    /// [`TransportError::Batch`].
    async fn write(&mut self, batch: &MessageBatch) -> Result<(), TransportError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}
