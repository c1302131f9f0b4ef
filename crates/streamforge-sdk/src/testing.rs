//! Scripted mock connectors for engine and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::connector::{ack_fn, AckFn, Input, Output};
use streamforge_types::{Ack, MessageBatch, TransportError};

/// One scripted step of a [`MockInput`].
#[derive(Debug, Clone)]
pub enum MockRead {
    /// Hand out this batch.
    Batch(MessageBatch),
    /// Fail the read with this error.
    Error(TransportError),
}

/// Input that replays a script of batches and errors, recording every
/// acknowledgement its callbacks receive.
pub struct MockInput {
    connect_errors: VecDeque<TransportError>,
    script: VecDeque<MockRead>,
    end_error: TransportError,
    acks: Arc<Mutex<Vec<Ack>>>,
    closed: Arc<AtomicBool>,
}

impl MockInput {
    /// An input that emits each batch once, then `EndOfInput`.
    #[must_use]
    pub fn new(batches: Vec<MessageBatch>) -> Self {
        Self::from_script(batches.into_iter().map(MockRead::Batch).collect())
    }

    /// An input replaying an explicit read script.
    #[must_use]
    pub fn from_script(script: Vec<MockRead>) -> Self {
        Self {
            connect_errors: VecDeque::new(),
            script: script.into(),
            end_error: TransportError::EndOfInput,
            acks: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a connect failure; each queued error fails one connect
    /// attempt, after which connects succeed.
    #[must_use]
    pub fn with_connect_error(mut self, error: TransportError) -> Self {
        self.connect_errors.push_back(error);
        self
    }

    /// Error returned once the script is exhausted (default `EndOfInput`).
    #[must_use]
    pub fn with_end_error(mut self, error: TransportError) -> Self {
        self.end_error = error;
        self
    }

    /// Handle to the acks recorded by this input's callbacks, in the
    /// order they arrived.
    #[must_use]
    pub fn acks(&self) -> Arc<Mutex<Vec<Ack>>> {
        Arc::clone(&self.acks)
    }

    /// Handle observing whether `close` has been invoked.
    #[must_use]
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl Input for MockInput {
    async fn connect(&mut self) -> Result<(), TransportError> {
        match self.connect_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn read(&mut self) -> Result<(MessageBatch, AckFn), TransportError> {
        match self.script.pop_front() {
            Some(MockRead::Batch(batch)) => {
                let acks = Arc::clone(&self.acks);
                let cb = ack_fn(move |ack: Ack| async move {
                    acks.lock().expect("ack log poisoned").push(ack);
                    Ok(())
                });
                Ok((batch, cb))
            }
            Some(MockRead::Error(err)) => Err(err),
            None => Err(self.end_error.clone()),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Output recording written batches, with scripted write and connect
/// results.
///
/// Clones share state, so a writer factory can hand a clone to every
/// worker while the test keeps one for assertions.
#[derive(Clone, Default)]
pub struct MockOutput {
    written: Arc<Mutex<Vec<MessageBatch>>>,
    responses: Arc<Mutex<VecDeque<Ack>>>,
    connect_errors: Arc<Mutex<VecDeque<TransportError>>>,
    close_count: Arc<AtomicUsize>,
}

impl MockOutput {
    /// An output that accepts every write.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result for the next write. Once the queue is empty,
    /// writes succeed. A queued `Err` fails the write without recording
    /// the batch.
    pub fn push_response(&self, response: Ack) {
        self.responses
            .lock()
            .expect("response queue poisoned")
            .push_back(response);
    }

    /// Queue a connect failure.
    pub fn push_connect_error(&self, error: TransportError) {
        self.connect_errors
            .lock()
            .expect("connect queue poisoned")
            .push_back(error);
    }

    /// Handle to the batches written so far.
    #[must_use]
    pub fn written(&self) -> Arc<Mutex<Vec<MessageBatch>>> {
        Arc::clone(&self.written)
    }

    /// How many times `close` has been invoked across all clones.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Output for MockOutput {
    async fn connect(&mut self) -> Result<(), TransportError> {
        match self
            .connect_errors
            .lock()
            .expect("connect queue poisoned")
            .pop_front()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn write(&mut self, batch: &MessageBatch) -> Result<(), TransportError> {
        let next = self
            .responses
            .lock()
            .expect("response queue poisoned")
            .pop_front();
        match next {
            Some(Err(err)) => Err(err),
            Some(Ok(())) | None => {
                self.written
                    .lock()
                    .expect("written log poisoned")
                    .push(batch.clone());
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
