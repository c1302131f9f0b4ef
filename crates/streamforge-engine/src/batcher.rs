//! Policy-driven transaction coalescing.
//!
//! [`Batcher`] collapses many small single-batch transactions into fewer
//! larger ones for the downstream component it wraps, then fans the
//! downstream ack back to every contributing response sink — splitting a
//! sparse per-index error map so each contributor only sees the failures
//! that belong to its own parts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::shutdown::{Shutdown, ShutdownWatcher};
use crate::stream::{Closable, Streamed};
use crate::transaction::{ResponseSink, Transaction, TransactionReceiver, TransactionSender};
use streamforge_types::{Ack, MessageBatch, MessagePart, TransportError};

/// Predicate evaluated over the pending parts after each append.
pub type CheckFn = Arc<dyn Fn(&[MessagePart]) -> bool + Send + Sync>;

/// When to emit the pending batch downstream.
///
/// A zero `count` / `byte_size` disables that trigger. The optional
/// period flushes whatever is pending even without new input.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BatchPolicy {
    /// Flush once this many parts are pending.
    #[serde(default)]
    pub count: usize,
    /// Flush once the pending parts reach this many payload bytes.
    #[serde(default)]
    pub byte_size: usize,
    /// Periodic flush interval in milliseconds.
    #[serde(default)]
    pub period_ms: Option<u64>,
    /// Opaque check hook; fires the flush when it returns `true`.
    #[serde(skip)]
    pub check: Option<CheckFn>,
}

impl BatchPolicy {
    /// Policy flushing every `count` parts.
    #[must_use]
    pub fn count(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    /// Add a byte-size trigger.
    #[must_use]
    pub fn with_byte_size(mut self, byte_size: usize) -> Self {
        self.byte_size = byte_size;
        self
    }

    /// Add a periodic flush.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period_ms = Some(period.as_millis() as u64);
        self
    }

    /// Add a check predicate.
    #[must_use]
    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&[MessagePart]) -> bool + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    /// The periodic flush interval, if any.
    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        self.period_ms.map(Duration::from_millis)
    }

    /// Whether the pending parts should flush now.
    #[must_use]
    pub fn triggered(&self, parts: &[MessagePart]) -> bool {
        if self.count > 0 && parts.len() >= self.count {
            return true;
        }
        if self.byte_size > 0 {
            let total: usize = parts.iter().map(MessagePart::len).sum();
            if total >= self.byte_size {
                return true;
            }
        }
        if let Some(check) = &self.check {
            if check(parts) {
                return true;
            }
        }
        false
    }
}

impl fmt::Debug for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchPolicy")
            .field("count", &self.count)
            .field("byte_size", &self.byte_size)
            .field("period_ms", &self.period_ms)
            .field("check", &self.check.is_some())
            .finish()
    }
}

/// Streamed coalescer wrapping a downstream component.
pub struct Batcher {
    child: Box<dyn Streamed + Send>,
    child_tx: TransactionSender,
    policy: BatchPolicy,
    shutdown: Shutdown,
    watcher: Option<ShutdownWatcher>,
}

impl Batcher {
    /// Wrap `child`, emitting merged transactions into it per `policy`.
    pub fn new(
        policy: BatchPolicy,
        mut child: Box<dyn Streamed + Send>,
    ) -> Result<Self, TransportError> {
        let (child_tx, child_rx) = tokio::sync::mpsc::channel(1);
        child.consume(child_rx)?;
        let (shutdown, watcher) = Shutdown::new();
        Ok(Self {
            child,
            child_tx,
            policy,
            shutdown,
            watcher: Some(watcher),
        })
    }
}

#[async_trait]
impl Closable for Batcher {
    /// Signals the batch loop only. The child is closed from
    /// [`Closable::wait_for_close`], after the pending batch has been
    /// flushed through it.
    fn close_async(&self) {
        self.shutdown.close_async();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        self.shutdown.wait_for_close(timeout).await?;
        self.child.close_async();
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.child.wait_for_close(remaining).await
    }
}

impl Streamed for Batcher {
    fn consume(&mut self, rx: TransactionReceiver) -> Result<(), TransportError> {
        let Some(watcher) = self.watcher.take() else {
            return Err(TransportError::AlreadyStarted);
        };
        tokio::spawn(batch_loop(
            self.policy.clone(),
            rx,
            self.child_tx.clone(),
            watcher,
        ));
        Ok(())
    }
}

#[derive(Default)]
struct Pending {
    parts: Vec<MessagePart>,
    sinks: Vec<(ResponseSink, usize, usize)>,
}

impl Pending {
    fn append(&mut self, txn: Transaction) {
        let (batch, sink) = txn.into_parts();
        let start = self.parts.len();
        let len = batch.len();
        self.parts.extend(batch.into_parts());
        self.sinks.push((sink, start, len));
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

async fn batch_loop(
    policy: BatchPolicy,
    mut rx: TransactionReceiver,
    child_tx: TransactionSender,
    mut watcher: ShutdownWatcher,
) {
    let mut pending = Pending::default();
    let mut fanouts: JoinSet<()> = JoinSet::new();
    let period = policy.period();
    let mut next_flush = period.map(|p| Instant::now() + p);

    loop {
        tokio::select! {
            biased;
            () = watcher.closing() => break,
            () = flush_timer(next_flush) => {
                if !pending.is_empty() {
                    flush(&mut pending, &child_tx, &mut fanouts).await;
                }
                next_flush = period.map(|p| Instant::now() + p);
            }
            received = rx.recv() => match received {
                Some(txn) => {
                    pending.append(txn);
                    if policy.triggered(&pending.parts) {
                        flush(&mut pending, &child_tx, &mut fanouts).await;
                        next_flush = period.map(|p| Instant::now() + p);
                    }
                }
                None => break,
            }
        }
    }

    // Forced close: transactions queued upstream but never appended are
    // nacked, while the appended pending batch still flushes below.
    rx.close();
    while let Ok(txn) = rx.try_recv() {
        txn.nack(TransportError::Shutdown);
    }

    if !pending.is_empty() {
        flush(&mut pending, &child_tx, &mut fanouts).await;
    }
    while fanouts.join_next().await.is_some() {}
}

async fn flush_timer(at: Option<Instant>) {
    match at {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn flush(
    pending: &mut Pending,
    child_tx: &TransactionSender,
    fanouts: &mut JoinSet<()>,
) {
    let taken = std::mem::take(pending);
    let merged = MessageBatch::new(taken.parts);
    let sinks = taken.sinks;
    tracing::debug!(parts = merged.len(), contributors = sinks.len(), "Flushing merged batch");

    let (txn, response_rx) = Transaction::new(merged);
    if child_tx.send(txn).await.is_err() {
        fan_out(sinks, Err(TransportError::TypeClosed));
        return;
    }
    fanouts.spawn(async move {
        let ack = response_rx
            .await
            .unwrap_or(Err(TransportError::TypeClosed));
        fan_out(sinks, ack);
    });
}

/// Dispatch one downstream ack to every contributing sink.
fn fan_out(sinks: Vec<(ResponseSink, usize, usize)>, ack: Ack) {
    match ack {
        Ok(()) => {
            for (sink, _, _) in sinks {
                sink.send(Ok(()));
            }
        }
        Err(TransportError::Batch(map)) => {
            for (sink, start, len) in sinks {
                let sub = map.slice(start, len);
                if sub.is_empty() {
                    sink.send(Ok(()));
                } else {
                    sink.send(Err(TransportError::Batch(sub)));
                }
            }
        }
        Err(err) => {
            for (sink, _, _) in sinks {
                sink.send(Err(err.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::AsyncWriter;
    use streamforge_sdk::testing::MockOutput;
    use streamforge_sdk::Output;
    use streamforge_types::BatchError;
    use tokio::sync::mpsc;

    fn part(payload: &str) -> MessagePart {
        MessagePart::from(payload)
    }

    fn single(payload: &str) -> MessageBatch {
        MessageBatch::single(part(payload))
    }

    fn writer_child(mock: &MockOutput) -> Box<dyn Streamed + Send> {
        let template = mock.clone();
        Box::new(AsyncWriter::new("child", 1, move || {
            Ok(Box::new(template.clone()) as Box<dyn Output>)
        }))
    }

    #[test]
    fn count_trigger_fires_at_threshold() {
        let policy = BatchPolicy::count(2);
        assert!(!policy.triggered(&[part("a")]));
        assert!(policy.triggered(&[part("a"), part("b")]));
    }

    #[test]
    fn byte_trigger_sums_payload_sizes() {
        let policy = BatchPolicy::default().with_byte_size(5);
        assert!(!policy.triggered(&[part("ab")]));
        assert!(policy.triggered(&[part("ab"), part("cde")]));
    }

    #[test]
    fn check_trigger_consults_the_hook() {
        let policy = BatchPolicy::default()
            .with_check(|parts| parts.iter().any(|p| p.as_bytes() == b"flush"));
        assert!(!policy.triggered(&[part("a")]));
        assert!(policy.triggered(&[part("a"), part("flush")]));
    }

    #[test]
    fn policy_deserializes_from_config() {
        let policy: BatchPolicy =
            serde_json::from_str(r#"{"count": 10, "byte_size": 1024, "period_ms": 500}"#).unwrap();
        assert_eq!(policy.count, 10);
        assert_eq!(policy.byte_size, 1024);
        assert_eq!(policy.period(), Some(Duration::from_millis(500)));
        assert!(policy.check.is_none());
    }

    #[tokio::test]
    async fn merges_in_order_and_acks_all_contributors() {
        let mock = MockOutput::new();
        let mut batcher = Batcher::new(BatchPolicy::count(3), writer_child(&mock)).unwrap();
        let (tx, rx) = mpsc::channel(4);
        batcher.consume(rx).unwrap();

        let mut responses = Vec::new();
        for payload in ["one", "two", "three"] {
            let (txn, response) = Transaction::new(single(payload));
            tx.send(txn).await.unwrap();
            responses.push(response);
        }
        for response in responses {
            assert_eq!(response.await.unwrap(), Ok(()));
        }

        let written = mock.written();
        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        let payloads: Vec<&[u8]> = written[0].iter().map(MessagePart::as_bytes).collect();
        assert_eq!(payloads, vec![b"one".as_slice(), b"two", b"three"]);
    }

    #[tokio::test]
    async fn sparse_error_map_splits_per_contributor() {
        let mock = MockOutput::new();
        // Merged batch: [a0, a1] from txn A, [b0] from txn B. Index 1
        // fails — only A should see it, re-indexed to its own index 1.
        mock.push_response(Err(TransportError::Batch(
            BatchError::new().with(1, TransportError::connector("bad part")),
        )));
        let mut batcher = Batcher::new(BatchPolicy::count(3), writer_child(&mock)).unwrap();
        let (tx, rx) = mpsc::channel(4);
        batcher.consume(rx).unwrap();

        let (txn_a, response_a) =
            Transaction::new(MessageBatch::new(vec![part("a0"), part("a1")]));
        let (txn_b, response_b) = Transaction::new(single("b0"));
        tx.send(txn_a).await.unwrap();
        tx.send(txn_b).await.unwrap();

        assert_eq!(
            response_a.await.unwrap(),
            Err(TransportError::Batch(
                BatchError::new().with(1, TransportError::connector("bad part")),
            )),
        );
        assert_eq!(response_b.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn period_flushes_without_new_input() {
        let mock = MockOutput::new();
        let policy = BatchPolicy::count(100).with_period(Duration::from_millis(20));
        let mut batcher = Batcher::new(policy, writer_child(&mock)).unwrap();
        let (tx, rx) = mpsc::channel(4);
        batcher.consume(rx).unwrap();

        let (txn, response) = Transaction::new(single("lonely"));
        tx.send(txn).await.unwrap();
        assert_eq!(response.await.unwrap(), Ok(()));
        assert_eq!(mock.written().lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_batch_flushes_at_shutdown() {
        let mock = MockOutput::new();
        let policy = BatchPolicy::count(100);
        let mut batcher = Batcher::new(policy, writer_child(&mock)).unwrap();
        let (tx, rx) = mpsc::channel(4);
        batcher.consume(rx).unwrap();

        let (txn, response) = Transaction::new(single("held back"));
        tx.send(txn).await.unwrap();
        // Give the loop a beat to append before closing.
        tokio::time::sleep(Duration::from_millis(10)).await;

        batcher.close_async();
        batcher
            .wait_for_close(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.await.unwrap(), Ok(()));
        assert_eq!(mock.written().lock().unwrap().len(), 1);
        drop(tx);
    }
}
