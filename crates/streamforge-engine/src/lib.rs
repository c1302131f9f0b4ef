//! Message-transport core: transactions, adapters, brokering, batching.
//!
//! Data flows input → [`AsyncReader`] → transaction channel → broker or
//! writer → output; acknowledgements flow back over each transaction's
//! one-shot response sink. Every streamed component implements the
//! two-phase [`Closable`] shutdown contract, and compound components
//! compose it over their children.

pub mod backoff;
pub mod batcher;
pub mod broker;
pub mod preserver;
pub mod reader;
pub mod shutdown;
pub mod stream;
pub mod transaction;
pub mod writer;

pub use batcher::{BatchPolicy, Batcher};
pub use broker::FallbackBroker;
pub use preserver::Preserver;
pub use reader::AsyncReader;
pub use shutdown::Shutdown;
pub use stream::{Closable, Streamed};
pub use transaction::{ResponseSink, Transaction, TransactionReceiver, TransactionSender};
pub use writer::AsyncWriter;
