//! Ordered try-next-on-failure output composition.
//!
//! [`FallbackBroker`] wires one bounded channel to each child output and
//! walks every inbound transaction down the list: a child only ever sees
//! a batch after every child before it has nacked that same batch. Walks
//! run as independent tasks so a slow child on one message never blocks
//! the others; within one walk the try-next sequence is strictly serial.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::shutdown::{Shutdown, ShutdownWatcher};
use crate::stream::{Closable, Streamed};
use crate::transaction::{Transaction, TransactionReceiver, TransactionSender};
use streamforge_types::TransportError;

/// Capacity of the channel feeding each child output.
const CHILD_CHANNEL_CAPACITY: usize = 1;

/// Streamed broker delivering through an ordered list of child outputs.
pub struct FallbackBroker {
    children: Vec<Box<dyn Streamed + Send>>,
    child_txs: Arc<Vec<TransactionSender>>,
    shutdown: Shutdown,
    watcher: Option<ShutdownWatcher>,
}

impl FallbackBroker {
    /// Wire `children` in fallback order. Each child starts consuming its
    /// own channel immediately; the broker itself runs once
    /// [`Streamed::consume`] is called.
    pub fn new(mut children: Vec<Box<dyn Streamed + Send>>) -> Result<Self, TransportError> {
        let mut child_txs = Vec::with_capacity(children.len());
        for child in &mut children {
            let (tx, rx) = tokio::sync::mpsc::channel(CHILD_CHANNEL_CAPACITY);
            child.consume(rx)?;
            child_txs.push(tx);
        }
        let (shutdown, watcher) = Shutdown::new();
        Ok(Self {
            children,
            child_txs: Arc::new(child_txs),
            shutdown,
            watcher: Some(watcher),
        })
    }
}

#[async_trait]
impl Closable for FallbackBroker {
    fn close_async(&self) {
        self.shutdown.close_async();
        for child in &self.children {
            child.close_async();
        }
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        self.shutdown.wait_for_close(timeout).await?;
        for child in &self.children {
            let remaining = deadline.saturating_duration_since(Instant::now());
            child.wait_for_close(remaining).await?;
        }
        Ok(())
    }
}

impl Streamed for FallbackBroker {
    fn consume(&mut self, rx: TransactionReceiver) -> Result<(), TransportError> {
        let Some(watcher) = self.watcher.take() else {
            return Err(TransportError::AlreadyStarted);
        };
        tokio::spawn(dispatch_loop(rx, Arc::clone(&self.child_txs), watcher));
        Ok(())
    }
}

async fn dispatch_loop(
    mut rx: TransactionReceiver,
    child_txs: Arc<Vec<TransactionSender>>,
    mut watcher: ShutdownWatcher,
) {
    let mut walks: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            () = watcher.closing() => break,
            received = rx.recv() => match received {
                Some(txn) => {
                    walks.spawn(walk(Arc::clone(&child_txs), txn));
                }
                None => break,
            }
        }
    }

    // Forced close: transactions still queued upstream are nacked, not
    // silently dropped.
    rx.close();
    while let Ok(txn) = rx.try_recv() {
        txn.nack(TransportError::Shutdown);
    }

    while walks.join_next().await.is_some() {}
}

/// Try each child in order; success stops the walk, the last failure is
/// reported if every child fails.
async fn walk(child_txs: Arc<Vec<TransactionSender>>, txn: Transaction) {
    let (batch, sink) = txn.into_parts();
    let mut last_err = TransportError::TypeClosed;

    for (index, child_tx) in child_txs.iter().enumerate() {
        let (child_txn, response_rx) = Transaction::new(batch.clone());
        if child_tx.send(child_txn).await.is_err() {
            last_err = TransportError::TypeClosed;
            continue;
        }
        match response_rx.await {
            Ok(Ok(())) => {
                sink.send(Ok(()));
                return;
            }
            Ok(Err(err)) => {
                tracing::debug!(child = index, error = %err, "Fallback child failed, trying next");
                last_err = err;
            }
            Err(_) => last_err = TransportError::TypeClosed,
        }
    }

    sink.send(Err(last_err));
}
