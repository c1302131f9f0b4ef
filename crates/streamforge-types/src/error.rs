//! Error sentinels and the acknowledgement model.
//!
//! [`TransportError`] carries the stable sentinel values exchanged at
//! connector boundaries. Sentinels are values, not strings — callers match
//! and compare variants structurally. Connector-specific failures ride in
//! [`TransportError::Connector`] untransformed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome delivered on a transaction's response sink: success, or a
/// failure covering the whole batch or a sparse subset of its parts.
pub type Ack = Result<(), TransportError>;

/// Stable error values at connector and transport boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum TransportError {
    /// The connector lost (or never had) its connection. Adapters recover
    /// locally by reconnecting; this never surfaces to the ack path except
    /// when a writer exhausts its retry bound.
    #[error("not connected")]
    NotConnected,

    /// The input has no further records to offer. Surfaced upward as
    /// [`TransportError::TypeClosed`] by the reader adapter.
    #[error("end of input")]
    EndOfInput,

    /// The component has finished shutting down and will accept no more
    /// work.
    #[error("type was closed")]
    TypeClosed,

    /// The operation hit its deadline. Readers retry the read; callers of
    /// `wait_for_close` observe this when the drain deadline elapses.
    #[error("action timed out")]
    Timeout,

    /// Shutdown began while the operation was still pending.
    #[error("type is shutting down")]
    Shutdown,

    /// `consume` was called on a component that is already consuming.
    #[error("consumer already started")]
    AlreadyStarted,

    /// Part of the batch failed; the map names which indexes and why.
    #[error("batch failed: {0}")]
    Batch(BatchError),

    /// Connector-specific failure, propagated untransformed.
    #[error("{0}")]
    Connector(String),
}

impl TransportError {
    /// Wrap a connector-specific error message.
    #[must_use]
    pub fn connector(message: impl Into<String>) -> Self {
        Self::Connector(message.into())
    }
}

/// A sparse index-to-error mapping over one batch.
///
/// Indexes are positions within the failed batch; absent indexes
/// succeeded. Entries are kept sorted by index and unique per index
/// (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    errors: Vec<(usize, TransportError)>,
}

impl BatchError {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for one part index.
    pub fn fail(&mut self, index: usize, error: TransportError) {
        match self.errors.binary_search_by_key(&index, |(i, _)| *i) {
            Ok(pos) => self.errors[pos] = (index, error),
            Err(pos) => self.errors.insert(pos, (index, error)),
        }
    }

    /// Builder-style [`BatchError::fail`].
    #[must_use]
    pub fn with(mut self, index: usize, error: TransportError) -> Self {
        self.fail(index, error);
        self
    }

    /// Look up the failure recorded for a part index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TransportError> {
        self.errors
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()
            .map(|pos| &self.errors[pos].1)
    }

    /// Number of failed indexes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` if no index failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over `(index, error)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TransportError)> {
        self.errors.iter().map(|(i, e)| (*i, e))
    }

    /// Extract the failures falling in `[start, start + len)`, re-indexed
    /// relative to `start`. Used to fan a merged-batch failure back out to
    /// the transactions that contributed each index range.
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> BatchError {
        let errors = self
            .errors
            .iter()
            .filter(|(i, _)| *i >= start && *i < start + len)
            .map(|(i, e)| (i - start, e.clone()))
            .collect();
        BatchError { errors }
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} message(s) failed", self.errors.len())?;
        if let Some((index, err)) = self.errors.first() {
            write!(f, ", first at index {index}: {err}")?;
        }
        Ok(())
    }
}

impl FromIterator<(usize, TransportError)> for BatchError {
    fn from_iter<T: IntoIterator<Item = (usize, TransportError)>>(iter: T) -> Self {
        let mut map = BatchError::new();
        for (index, err) in iter {
            map.fail(index, err);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_equality_is_structural() {
        assert_eq!(TransportError::NotConnected, TransportError::NotConnected);
        assert_ne!(TransportError::NotConnected, TransportError::TypeClosed);
        assert_eq!(
            TransportError::connector("bad connect"),
            TransportError::Connector("bad connect".to_string()),
        );
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(TransportError::NotConnected.to_string(), "not connected");
        assert_eq!(TransportError::TypeClosed.to_string(), "type was closed");
        assert_eq!(TransportError::Timeout.to_string(), "action timed out");
        assert_eq!(
            TransportError::connector("boom").to_string(),
            "boom",
        );
    }

    #[test]
    fn batch_error_keeps_indexes_sorted_and_unique() {
        let mut be = BatchError::new();
        be.fail(4, TransportError::connector("d"));
        be.fail(1, TransportError::connector("a"));
        be.fail(4, TransportError::connector("d2"));

        let indexes: Vec<usize> = be.iter().map(|(i, _)| i).collect();
        assert_eq!(indexes, vec![1, 4]);
        assert_eq!(be.get(4), Some(&TransportError::connector("d2")));
        assert_eq!(be.get(2), None);
    }

    #[test]
    fn slice_reindexes_relative_to_start() {
        let be = BatchError::new()
            .with(0, TransportError::connector("zero"))
            .with(3, TransportError::connector("three"))
            .with(5, TransportError::connector("five"));

        // Contributor owning indexes [3, 5).
        let sub = be.slice(3, 2);
        assert_eq!(sub.len(), 1);
        assert_eq!(sub.get(0), Some(&TransportError::connector("three")));

        // Contributor owning indexes [1, 2) saw no failures.
        assert!(be.slice(1, 1).is_empty());
    }

    #[test]
    fn serde_roundtrip() {
        let err = TransportError::Batch(
            BatchError::new().with(2, TransportError::Timeout),
        );
        let json = serde_json::to_string(&err).unwrap();
        let back: TransportError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
