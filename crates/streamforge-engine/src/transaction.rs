//! Transactions couple a batch with a single-use response sink.
//!
//! The sink is a one-shot channel owned by the transaction's originator;
//! the transaction carries the sender half, never a back-pointer. Sending
//! twice is unrepresentable — every terminal operation consumes the sink.

use tokio::sync::{mpsc, oneshot};

use streamforge_types::{Ack, MessageBatch, TransportError};

/// Sender half of a bounded transaction channel.
pub type TransactionSender = mpsc::Sender<Transaction>;

/// Receiver half of a bounded transaction channel.
pub type TransactionReceiver = mpsc::Receiver<Transaction>;

/// A batch paired with the sink that will receive its one acknowledgement.
#[derive(Debug)]
pub struct Transaction {
    batch: MessageBatch,
    response: ResponseSink,
}

impl Transaction {
    /// Create a transaction and the receiver its originator awaits the
    /// ack on.
    #[must_use]
    pub fn new(batch: MessageBatch) -> (Self, oneshot::Receiver<Ack>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                batch,
                response: ResponseSink { tx },
            },
            rx,
        )
    }

    /// Borrow the batch. The transport layer never mutates it.
    #[must_use]
    pub fn batch(&self) -> &MessageBatch {
        &self.batch
    }

    /// Split into the batch and its response sink, for intermediaries
    /// that retain parts or defer the ack.
    #[must_use]
    pub fn into_parts(self) -> (MessageBatch, ResponseSink) {
        (self.batch, self.response)
    }

    /// Acknowledge success.
    pub fn ack(self) {
        self.response.send(Ok(()));
    }

    /// Acknowledge failure.
    pub fn nack(self, error: TransportError) {
        self.response.send(Err(error));
    }

    /// Deliver an already-computed ack value.
    pub fn respond(self, ack: Ack) {
        self.response.send(ack);
    }
}

/// Single-use acknowledgement sink.
///
/// Dropping the sink without sending resolves the originator's receiver
/// with an error, so an ack is never silently lost.
#[derive(Debug)]
pub struct ResponseSink {
    tx: oneshot::Sender<Ack>,
}

impl ResponseSink {
    /// Deliver the acknowledgement. An originator that stopped listening
    /// is not an error here — it already gave up on the outcome.
    pub fn send(self, ack: Ack) {
        let _ = self.tx.send(ack);
    }
}
