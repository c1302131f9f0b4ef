//! Shared message, batch, and error-sentinel types for the Streamforge
//! transport core.
//!
//! This crate is dependency-boundary-safe for both engine and connector usage.

pub mod error;
pub mod message;

pub use error::{Ack, BatchError, TransportError};
pub use message::{MessageBatch, MessagePart};
