//! In-memory redelivery buffer over an input.
//!
//! [`Preserver`] wraps an [`Input`] and substitutes its own ack callback
//! on every read. A nack requeues the batch for redelivery ahead of new
//! inner reads; only a success (or process shutdown) reaches the inner
//! callback, so sources that cannot redeliver still get a bounded form of
//! at-least-once. Buffered batches carry opaque monotonic IDs so a batch
//! can never sit in the buffer twice.
//!
//! End-of-input is deferred while batches are still unresolved: a nack
//! arriving after the inner input is exhausted must still be redelivered,
//! so `read` surfaces the exhaustion only once every outstanding batch
//! has settled.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use streamforge_sdk::{ack_fn, AckFn, Input};
use streamforge_types::{Ack, MessageBatch, TransportError};

/// Input decorator converting nacks into automatic redelivery.
pub struct Preserver {
    inner: Box<dyn Input>,
    resend: Arc<Mutex<VecDeque<ResendEntry>>>,
    slots: Arc<Semaphore>,
    capacity: usize,
    settled: Arc<Notify>,
    next_id: u64,
}

struct ResendEntry {
    id: u64,
    batch: MessageBatch,
    inner_ack: AckFn,
    permit: OwnedSemaphorePermit,
}

impl Preserver {
    /// Wrap `inner`, allowing at most `max_in_flight` unacknowledged
    /// batches at a time.
    #[must_use]
    pub fn new(inner: Box<dyn Input>, max_in_flight: usize) -> Self {
        let capacity = max_in_flight.max(1);
        Self {
            inner,
            resend: Arc::new(Mutex::new(VecDeque::new())),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            settled: Arc::new(Notify::new()),
            next_id: 0,
        }
    }

    /// Batches currently queued for redelivery.
    #[must_use]
    pub fn pending_redeliveries(&self) -> usize {
        self.resend.lock().expect("resend queue poisoned").len()
    }

    fn pop_resend(&self) -> Option<ResendEntry> {
        self.resend
            .lock()
            .expect("resend queue poisoned")
            .pop_front()
    }

    fn deliver(&self, entry: ResendEntry) -> (MessageBatch, AckFn) {
        let batch = entry.batch.clone();
        let resend = Arc::clone(&self.resend);
        let settled = Arc::clone(&self.settled);
        let cb = ack_fn(move |ack: Ack| async move {
            match ack {
                Ok(()) => {
                    let ResendEntry {
                        inner_ack, permit, ..
                    } = entry;
                    let result = inner_ack(Ok(())).await;
                    drop(permit);
                    settled.notify_one();
                    result
                }
                Err(err) => {
                    tracing::debug!(id = entry.id, error = %err, "Batch nacked, queued for redelivery");
                    {
                        let mut queue = resend.lock().expect("resend queue poisoned");
                        if queue.iter().all(|e| e.id != entry.id) {
                            queue.push_back(entry);
                        }
                    }
                    settled.notify_one();
                    Ok(())
                }
            }
        });
        (batch, cb)
    }

    /// The inner input is exhausted; hold the read open until every
    /// outstanding batch settles, redelivering any that come back nacked.
    async fn drain_or_finish(
        &mut self,
        end: TransportError,
    ) -> Result<(MessageBatch, AckFn), TransportError> {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            if let Some(entry) = self.pop_resend() {
                return Ok(self.deliver(entry));
            }
            if self.slots.available_permits() == self.capacity {
                return Err(end.clone());
            }
            settled.await;
        }
    }
}

#[async_trait]
impl Input for Preserver {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    async fn read(&mut self) -> Result<(MessageBatch, AckFn), TransportError> {
        // Nacked batches take priority over new inner reads.
        if let Some(entry) = self.pop_resend() {
            return Ok(self.deliver(entry));
        }

        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| TransportError::TypeClosed)?;

        // A nack may have landed while we waited for the slot.
        if let Some(entry) = self.pop_resend() {
            drop(permit);
            return Ok(self.deliver(entry));
        }

        match self.inner.read().await {
            Ok((batch, inner_ack)) => {
                let id = self.next_id;
                self.next_id += 1;
                let entry = ResendEntry {
                    id,
                    batch,
                    inner_ack,
                    permit,
                };
                Ok(self.deliver(entry))
            }
            Err(end @ (TransportError::EndOfInput | TransportError::TypeClosed)) => {
                drop(permit);
                self.drain_or_finish(end).await
            }
            Err(err) => Err(err),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Entries still queued take the process-shutdown outcome; their
        // inner callbacks are dropped uninvoked.
        let abandoned = self.pending_redeliveries();
        if abandoned > 0 {
            tracing::debug!(abandoned, "Closing with batches still queued for redelivery");
        }
        self.inner.close().await
    }
}
