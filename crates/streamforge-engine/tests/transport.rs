//! End-to-end transport tests: input → reader → channel → writer → output,
//! with acknowledgements flowing back over each transaction's sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use streamforge_engine::{AsyncReader, AsyncWriter, Closable, Preserver, Streamed, Transaction};
use streamforge_sdk::testing::{MockInput, MockOutput, MockRead};
use streamforge_sdk::{Input, Output};
use streamforge_types::{MessageBatch, MessagePart, TransportError};

mod support;

fn batch(payload: &str) -> MessageBatch {
    MessageBatch::single(MessagePart::from(payload))
}

fn writer_over(mock: &MockOutput, workers: usize) -> AsyncWriter {
    let template = mock.clone();
    AsyncWriter::new("out", workers, move || {
        Ok(Box::new(template.clone()) as Box<dyn Output>)
    })
}

/// One record in, one success ack out, output closed after shutdown.
#[tokio::test]
async fn happy_path_single_message() {
    support::init_tracing();
    let input = MockInput::new(vec![batch("hello world")]);
    let input_acks = input.acks();
    let input_closed = input.closed_flag();
    let mut reader = AsyncReader::new("in", Box::new(input));

    let output = MockOutput::new();
    let mut writer = writer_over(&output, 1);

    let (tx, rx) = mpsc::channel(1);
    writer.consume(rx).unwrap();
    reader.consume(tx).unwrap();

    reader.wait_for_close(Duration::from_secs(1)).await.unwrap();
    writer.close_async();
    writer.wait_for_close(Duration::from_secs(1)).await.unwrap();

    assert_eq!(input_acks.lock().unwrap().as_slice(), &[Ok(())]);
    let written = output.written();
    let written = written.lock().unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].parts()[0].as_bytes(), b"hello world");
    assert!(input_closed.load(Ordering::SeqCst));
    assert!(output.close_count() >= 1);
}

/// A three-part batch arrives at the output intact and in order, with a
/// single success ack upstream.
#[tokio::test]
async fn happy_path_batch_of_three() {
    let parts = vec![
        MessagePart::from("hello world"),
        MessagePart::from("this is a test message"),
        MessagePart::from("and it will work"),
    ];
    let input = MockInput::new(vec![MessageBatch::new(parts.clone())]);
    let input_acks = input.acks();
    let mut reader = AsyncReader::new("in", Box::new(input));

    let output = MockOutput::new();
    let mut writer = writer_over(&output, 1);

    let (tx, rx) = mpsc::channel(1);
    writer.consume(rx).unwrap();
    reader.consume(tx).unwrap();

    reader.wait_for_close(Duration::from_secs(1)).await.unwrap();
    assert_eq!(input_acks.lock().unwrap().as_slice(), &[Ok(())]);

    let written = output.written();
    let written = written.lock().unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].parts(), parts.as_slice());
}

/// A connect failure surfaces untransformed from the connector boundary;
/// nothing is emitted.
#[tokio::test]
async fn sad_connect_surfaces_the_error() {
    let input = MockInput::new(vec![batch("never seen")])
        .with_connect_error(TransportError::connector("bad connect"));
    let mut wrapped = Preserver::new(Box::new(input), 4);

    assert_eq!(
        wrapped.connect().await.unwrap_err(),
        TransportError::connector("bad connect"),
    );
}

/// `NotConnected` from a read stays internal (the record still arrives
/// after the reconnect); `EndOfInput` drains and closes cleanly; a
/// consumer that drops a transaction without responding surfaces
/// `TypeClosed` to the input's callback.
#[tokio::test]
async fn sentinel_mapping() {
    let input = MockInput::from_script(vec![
        MockRead::Error(TransportError::NotConnected),
        MockRead::Batch(batch("survives reconnect")),
        MockRead::Batch(batch("dropped downstream")),
    ]);
    let input_acks = input.acks();
    let mut reader = AsyncReader::new("in", Box::new(input));

    let (tx, mut rx) = mpsc::channel(1);
    reader.consume(tx).unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.batch().parts()[0].as_bytes(), b"survives reconnect");
    first.ack();

    // Drop the second transaction without ever responding.
    let second = rx.recv().await.unwrap();
    drop(second);

    // EndOfInput: channel closes, shutdown is clean.
    assert!(rx.recv().await.is_none());
    reader.wait_for_close(Duration::from_secs(1)).await.unwrap();

    assert_eq!(
        input_acks.lock().unwrap().as_slice(),
        &[Ok(()), Err(TransportError::TypeClosed)],
    );
}

/// Output whose writes block until released, for shutdown-timeout tests.
#[derive(Clone)]
struct BlockingOutput {
    release: Arc<Notify>,
    blocked: Arc<AtomicUsize>,
    written: Arc<Mutex<Vec<MessageBatch>>>,
    close_count: Arc<AtomicUsize>,
}

impl BlockingOutput {
    fn new() -> Self {
        Self {
            release: Arc::new(Notify::new()),
            blocked: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(Mutex::new(Vec::new())),
            close_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Output for BlockingOutput {
    async fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn write(&mut self, batch: &MessageBatch) -> Result<(), TransportError> {
        self.blocked.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        self.written.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `wait_for_close` with a blocked in-flight write times out; once the
/// write unblocks, a second wait succeeds and the connector is closed.
#[tokio::test]
async fn shutdown_timeout_then_clean_drain() {
    support::init_tracing();
    let output = BlockingOutput::new();
    let template = output.clone();
    let mut writer = AsyncWriter::new("out", 1, move || {
        Ok(Box::new(template.clone()) as Box<dyn Output>)
    });

    let (tx, rx) = mpsc::channel(1);
    writer.consume(rx).unwrap();

    let (txn, response) = Transaction::new(batch("in flight"));
    tx.send(txn).await.unwrap();

    // Wait for the worker to be mid-write.
    while output.blocked.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    writer.close_async();
    assert_eq!(
        writer
            .wait_for_close(Duration::from_millis(5))
            .await
            .unwrap_err(),
        TransportError::Timeout,
    );
    assert_eq!(output.close_count.load(Ordering::SeqCst), 0);

    // Unblock the write; the in-flight transaction completes.
    output.release.notify_one();
    writer.wait_for_close(Duration::from_secs(1)).await.unwrap();
    assert_eq!(response.await.unwrap(), Ok(()));
    assert_eq!(output.close_count.load(Ordering::SeqCst), 1);
}

/// Every transaction submitted before a clean close receives exactly one
/// ack.
#[tokio::test]
async fn ack_conservation_across_the_pool() {
    let output = MockOutput::new();
    output.push_response(Err(TransportError::connector("flaky")));
    let mut writer = writer_over(&output, 4);

    let (tx, rx) = mpsc::channel(16);
    writer.consume(rx).unwrap();

    let mut responses = Vec::new();
    for i in 0..10 {
        let (txn, response) = Transaction::new(batch(&format!("m{i}")));
        tx.send(txn).await.unwrap();
        responses.push(response);
    }

    let mut acks = 0;
    for response in responses {
        response.await.unwrap();
        acks += 1;
    }
    assert_eq!(acks, 10);

    drop(tx);
    writer.close_async();
    writer.wait_for_close(Duration::from_secs(1)).await.unwrap();
}

/// A nacked batch is redelivered through the reader until a consumer
/// finally succeeds; the inner input sees exactly one success.
#[tokio::test]
async fn preserver_redelivers_through_the_reader() {
    let input = MockInput::new(vec![batch("try again")]);
    let inner_acks = input.acks();
    let preserver = Preserver::new(Box::new(input), 4);
    let mut reader = AsyncReader::new("in", Box::new(preserver));

    let (tx, mut rx) = mpsc::channel(1);
    reader.consume(tx).unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.batch().parts()[0].as_bytes(), b"try again");
    first.nack(TransportError::connector("test err"));

    // The same batch comes back ahead of end-of-input.
    let second = rx.recv().await.unwrap();
    assert_eq!(second.batch().parts()[0].as_bytes(), b"try again");
    second.ack();

    assert!(rx.recv().await.is_none());
    reader.wait_for_close(Duration::from_secs(1)).await.unwrap();
    assert_eq!(inner_acks.lock().unwrap().as_slice(), &[Ok(())]);
}

/// The registry's built-in `generate` input drives a full pipeline.
#[tokio::test]
async fn builtin_generate_through_the_pipeline() {
    let config = serde_json::json!({"mapping": "hello world", "count": 3});
    let input = streamforge_sdk::global()
        .new_input("generate", &config)
        .unwrap();
    let mut reader = AsyncReader::new("generate", input);

    let output = MockOutput::new();
    let mut writer = writer_over(&output, 1);

    let (tx, rx) = mpsc::channel(1);
    writer.consume(rx).unwrap();
    reader.consume(tx).unwrap();

    reader.wait_for_close(Duration::from_secs(1)).await.unwrap();
    assert_eq!(output.written().lock().unwrap().len(), 3);
}
