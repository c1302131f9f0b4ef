//! Connector-facing surface of the Streamforge transport core.
//!
//! Connectors implement [`Input`] or [`Output`] and register a factory in
//! the process-wide [`registry`]. The engine consumes them exclusively
//! through those traits — connector state (connected / disconnected) stays
//! internal and is observed only through error sentinels.

pub mod builtin;
pub mod connector;
pub mod registry;
pub mod testing;

pub use connector::{ack_fn, noop_ack_fn, AckFn, AckFuture, Input, Output};
pub use registry::{global, ConnectorRegistry};
