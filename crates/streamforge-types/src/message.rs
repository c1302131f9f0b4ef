//! Message part and batch model.
//!
//! [`MessagePart`] is a single record: a byte payload plus string metadata
//! and an optional structured form. Parts are values — clone one when it
//! needs an independent lifetime. [`MessageBatch`] is an ordered sequence
//! of parts handed through the transport as one unit.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single immutable-by-convention record.
///
/// Metadata keys are unique; writing an existing key replaces its value
/// (last write wins). The optional structured form carries a parsed JSON
/// representation of the payload for connectors that want one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessagePart {
    data: Bytes,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    structured: Option<serde_json::Value>,
}

impl MessagePart {
    /// Create a part from a raw payload.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: HashMap::new(),
            structured: None,
        }
    }

    /// Returns the payload.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the payload as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Set a metadata value. An existing key is overwritten.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Builder-style [`MessagePart::set_metadata`].
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_metadata(key, value);
        self
    }

    /// Look up a metadata value by key.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Iterate over metadata pairs. Order is unspecified; only the final
    /// value per key is observable.
    pub fn metadata_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the structured form, if one has been attached.
    #[must_use]
    pub fn structured(&self) -> Option<&serde_json::Value> {
        self.structured.as_ref()
    }

    /// Attach a structured form.
    pub fn set_structured(&mut self, value: serde_json::Value) {
        self.structured = Some(value);
    }

    /// Builder-style [`MessagePart::set_structured`].
    #[must_use]
    pub fn with_structured(mut self, value: serde_json::Value) -> Self {
        self.set_structured(value);
        self
    }
}

impl From<&str> for MessagePart {
    fn from(s: &str) -> Self {
        Self::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for MessagePart {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

/// An ordered sequence of parts moved through the transport as one unit.
///
/// Iteration preserves insertion order. A batch carries no metadata of its
/// own; per-message metadata lives on its parts. Empty batches are invalid
/// at the transport boundary — adapters never emit them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageBatch {
    parts: Vec<MessagePart>,
}

impl MessageBatch {
    /// Create a batch from parts.
    #[must_use]
    pub fn new(parts: Vec<MessagePart>) -> Self {
        Self { parts }
    }

    /// Create a batch holding a single part.
    #[must_use]
    pub fn single(part: MessagePart) -> Self {
        Self { parts: vec![part] }
    }

    /// Number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns `true` if the batch has no parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Sum of payload lengths across all parts.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.parts.iter().map(MessagePart::len).sum()
    }

    /// Append a part at the end.
    pub fn push(&mut self, part: MessagePart) {
        self.parts.push(part);
    }

    /// Borrow the parts in insertion order.
    #[must_use]
    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }

    /// Iterate over parts in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, MessagePart> {
        self.parts.iter()
    }

    /// Consume the batch, returning its parts.
    #[must_use]
    pub fn into_parts(self) -> Vec<MessagePart> {
        self.parts
    }
}

impl From<MessagePart> for MessageBatch {
    fn from(part: MessagePart) -> Self {
        Self::single(part)
    }
}

impl FromIterator<MessagePart> for MessageBatch {
    fn from_iter<T: IntoIterator<Item = MessagePart>>(iter: T) -> Self {
        Self {
            parts: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for MessageBatch {
    type Item = MessagePart;
    type IntoIter = std::vec::IntoIter<MessagePart>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.into_iter()
    }
}

impl<'a> IntoIterator for &'a MessageBatch {
    type Item = &'a MessagePart;
    type IntoIter = std::slice::Iter<'a, MessagePart>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}
