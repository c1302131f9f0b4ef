//! Worker pool driving a blocking output.
//!
//! [`AsyncWriter`] fans one transaction channel out to `max_in_flight`
//! symmetric workers. Each worker owns its own connector instance from
//! the factory, so writes within a worker are serialized by ownership and
//! no lock guards connector state. `NotConnected` from a write triggers a
//! reconnect-and-retry cycle bounded by the configured retry count;
//! exhausting it nacks with the final error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::backoff::Backoff;
use crate::shutdown::{signalled, Shutdown, ShutdownWatcher};
use crate::stream::{Closable, Streamed};
use crate::transaction::{Transaction, TransactionReceiver};
use streamforge_sdk::Output;
use streamforge_types::{Ack, TransportError};

const DEFAULT_WRITE_RETRIES: usize = 3;

/// Factory producing one connector instance per worker.
pub type OutputFactory =
    Box<dyn Fn() -> Result<Box<dyn Output>, TransportError> + Send + Sync>;

/// Streamed worker pool over an [`Output`].
pub struct AsyncWriter {
    name: String,
    max_in_flight: usize,
    write_retries: usize,
    factory: OutputFactory,
    shutdown: Shutdown,
    watcher: Option<ShutdownWatcher>,
}

impl AsyncWriter {
    /// A pool of `max_in_flight` workers, each writing through its own
    /// connector from `factory`.
    #[must_use]
    pub fn new<F>(name: impl Into<String>, max_in_flight: usize, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Output>, TransportError> + Send + Sync + 'static,
    {
        let (shutdown, watcher) = Shutdown::new();
        Self {
            name: name.into(),
            max_in_flight: max_in_flight.max(1),
            write_retries: DEFAULT_WRITE_RETRIES,
            factory: Box::new(factory),
            shutdown,
            watcher: Some(watcher),
        }
    }

    /// Override the bounded `NotConnected` write retry count.
    #[must_use]
    pub fn with_write_retries(mut self, retries: usize) -> Self {
        self.write_retries = retries;
        self
    }
}

#[async_trait]
impl Closable for AsyncWriter {
    fn close_async(&self) {
        self.shutdown.close_async();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), TransportError> {
        self.shutdown.wait_for_close(timeout).await
    }
}

impl Streamed for AsyncWriter {
    fn consume(&mut self, rx: TransactionReceiver) -> Result<(), TransportError> {
        if self.watcher.is_none() {
            return Err(TransportError::AlreadyStarted);
        }

        // Build every connector before spawning anything so a factory
        // failure leaves the component restartable.
        let mut outputs = Vec::with_capacity(self.max_in_flight);
        for _ in 0..self.max_in_flight {
            outputs.push((self.factory)()?);
        }
        let watcher = self.watcher.take().expect("checked above");

        let shared_rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();
        for (worker_id, output) in outputs.into_iter().enumerate() {
            workers.spawn(write_loop(
                self.name.clone(),
                worker_id,
                output,
                Arc::clone(&shared_rx),
                watcher.signal(),
                self.write_retries,
            ));
        }

        let name = self.name.clone();
        tokio::spawn(async move {
            let _watcher = watcher;
            while workers.join_next().await.is_some() {}
            // Transactions pulled into the channel but never claimed by a
            // worker get a shutdown nack rather than a silent drop.
            let mut rx = shared_rx.lock().await;
            rx.close();
            while let Ok(txn) = rx.try_recv() {
                txn.nack(TransportError::Shutdown);
            }
            tracing::debug!(output = %name, "Writer pool shut down");
        });
        Ok(())
    }
}

async fn write_loop(
    name: String,
    worker_id: usize,
    mut output: Box<dyn Output>,
    shared_rx: Arc<Mutex<TransactionReceiver>>,
    mut closing: watch::Receiver<bool>,
    write_retries: usize,
) {
    let mut backoff = Backoff::reconnect();
    let mut connected = false;

    loop {
        if !connected {
            match connect_with_backoff(&name, output.as_mut(), &mut closing, &mut backoff).await {
                Some(()) => connected = true,
                None => break,
            }
        }

        let txn = tokio::select! {
            biased;
            () = signalled(&mut closing) => break,
            received = recv_shared(&shared_rx) => match received {
                Some(txn) => txn,
                None => break,
            }
        };

        let mut attempts = 0usize;
        let ack: Ack = loop {
            match output.write(txn.batch()).await {
                Ok(()) => {
                    backoff.reset();
                    break Ok(());
                }
                Err(TransportError::NotConnected) => {
                    connected = false;
                    attempts += 1;
                    if attempts > write_retries {
                        break Err(TransportError::NotConnected);
                    }
                    tracing::warn!(
                        output = %name,
                        worker = worker_id,
                        attempt = attempts,
                        "Write lost connection, reconnecting"
                    );
                    match connect_with_backoff(&name, output.as_mut(), &mut closing, &mut backoff)
                        .await
                    {
                        Some(()) => connected = true,
                        // Shutdown interrupted the retry: the pulled
                        // transaction is nacked, not dropped.
                        None => break Err(TransportError::Shutdown),
                    }
                }
                Err(err) => break Err(err),
            }
        };
        let shutting_down = matches!(ack, Err(TransportError::Shutdown));
        txn.respond(ack);
        if shutting_down {
            break;
        }
    }

    if let Err(err) = output.close().await {
        tracing::warn!(output = %name, worker = worker_id, error = %err, "Output close failed");
    }
}

/// Workers compete on one receiver; the mutex is held only while waiting
/// for the next transaction, never across a write.
async fn recv_shared(rx: &Arc<Mutex<TransactionReceiver>>) -> Option<Transaction> {
    rx.lock().await.recv().await
}

/// Reconnect with capped backoff. Returns `None` if shutdown was
/// signalled before a connection was established.
async fn connect_with_backoff(
    name: &str,
    output: &mut dyn Output,
    closing: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> Option<()> {
    loop {
        let result = tokio::select! {
            biased;
            () = signalled(closing) => return None,
            res = output.connect() => res,
        };
        match result {
            Ok(()) => return Some(()),
            Err(err) => {
                let delay = backoff.next();
                tracing::warn!(
                    output = %name,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Output connect failed, retrying"
                );
                tokio::select! {
                    biased;
                    () = signalled(closing) => return None,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
