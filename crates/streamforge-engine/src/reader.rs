//! Pull-to-push bridge over a blocking input.
//!
//! [`AsyncReader`] owns its input exclusively inside one task: it keeps
//! the connection alive with capped backoff, wraps each read as a
//! [`Transaction`], publishes it on the downstream channel, and hands the
//! eventual ack to the input's callback from a per-ack waiter task. The
//! bounded downstream channel is the back-pressure: a stalled consumer
//! stops the reader from pulling.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::backoff::Backoff;
use crate::shutdown::{Shutdown, ShutdownWatcher};
use crate::stream::Closable;
use crate::transaction::{Transaction, TransactionSender};
use async_trait::async_trait;
use streamforge_sdk::{AckFn, Input};
use streamforge_types::{Ack, TransportError};

/// Streamed wrapper lifting an [`Input`] into a transaction channel.
pub struct AsyncReader {
    name: String,
    shutdown: Shutdown,
    state: Option<ReaderState>,
}

struct ReaderState {
    input: Box<dyn Input>,
    watcher: ShutdownWatcher,
}

impl AsyncReader {
    /// Wrap `input`. Nothing runs until [`AsyncReader::consume`].
    #[must_use]
    pub fn new(name: impl Into<String>, input: Box<dyn Input>) -> Self {
        let (shutdown, watcher) = Shutdown::new();
        Self {
            name: name.into(),
            shutdown,
            state: Some(ReaderState { input, watcher }),
        }
    }

    /// Install the downstream transaction channel and start the read
    /// loop. Fails with [`TransportError::AlreadyStarted`] on a second
    /// call.
    pub fn consume(&mut self, tx: TransactionSender) -> Result<(), TransportError> {
        let Some(state) = self.state.take() else {
            return Err(TransportError::AlreadyStarted);
        };
        tokio::spawn(read_loop(self.name.clone(), state.input, state.watcher, tx));
        Ok(())
    }
}

#[async_trait]
impl Closable for AsyncReader {
    fn close_async(&self) {
        self.shutdown.close_async();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), TransportError> {
        self.shutdown.wait_for_close(timeout).await
    }
}

async fn read_loop(
    name: String,
    mut input: Box<dyn Input>,
    mut watcher: ShutdownWatcher,
    tx: TransactionSender,
) {
    let mut backoff = Backoff::reconnect();
    let mut connected = false;
    let mut pending: JoinSet<()> = JoinSet::new();

    loop {
        if watcher.is_closing() {
            break;
        }

        if !connected {
            let result = tokio::select! {
                biased;
                () = watcher.closing() => break,
                res = input.connect() => res,
            };
            match result {
                Ok(()) => connected = true,
                Err(TransportError::EndOfInput | TransportError::TypeClosed) => break,
                Err(err) => {
                    let delay = backoff.next();
                    tracing::warn!(
                        input = %name,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Input connect failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = watcher.closing() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
            continue;
        }

        let read_result = tokio::select! {
            biased;
            () = watcher.closing() => break,
            res = input.read() => res,
        };
        let (batch, ack_cb) = match read_result {
            Ok(pair) => pair,
            Err(TransportError::NotConnected) => {
                tracing::debug!(input = %name, "Input lost connection, reconnecting");
                connected = false;
                continue;
            }
            Err(TransportError::EndOfInput | TransportError::TypeClosed) => break,
            Err(TransportError::Timeout) => continue,
            Err(err) => {
                tracing::warn!(input = %name, error = %err, "Read failed, record skipped");
                continue;
            }
        };
        backoff.reset();

        let (txn, response_rx) = Transaction::new(batch);
        tokio::select! {
            biased;
            () = watcher.closing() => {
                // Pulled but never published: the callback is still owed
                // its one invocation.
                settle_ack(&mut pending, name.clone(), ack_cb, Err(TransportError::Shutdown));
                break;
            }
            sent = tx.send(txn) => {
                if sent.is_err() {
                    tracing::debug!(input = %name, "Downstream channel closed, stopping");
                    settle_ack(&mut pending, name.clone(), ack_cb, Err(TransportError::TypeClosed));
                    break;
                }
                spawn_ack_waiter(&mut pending, name.clone(), response_rx, ack_cb);
            }
        }
    }

    // Stop publishing before draining so the consumer sees the channel
    // close at the right point.
    drop(tx);

    if !pending.is_empty() {
        tracing::debug!(input = %name, outstanding = pending.len(), "Draining outstanding acks");
    }
    while pending.join_next().await.is_some() {}

    if let Err(err) = input.close().await {
        tracing::warn!(input = %name, error = %err, "Input close failed");
    }
    tracing::debug!(input = %name, "Input shut down");
}

fn spawn_ack_waiter(
    pending: &mut JoinSet<()>,
    name: String,
    response_rx: oneshot::Receiver<Ack>,
    ack_cb: AckFn,
) {
    pending.spawn(async move {
        let ack = response_rx
            .await
            .unwrap_or(Err(TransportError::TypeClosed));
        if let Err(err) = ack_cb(ack).await {
            tracing::warn!(input = %name, error = %err, "Ack callback failed");
        }
    });
}

fn settle_ack(pending: &mut JoinSet<()>, name: String, ack_cb: AckFn, ack: Ack) {
    pending.spawn(async move {
        if let Err(err) = ack_cb(ack).await {
            tracing::warn!(input = %name, error = %err, "Ack callback failed");
        }
    });
}
