//! Broker record
//!
//! The unit handed to the broker client: one topic, an optional key and a payload.

use bytes::Bytes;

/// A record ready to be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Destination topic (never empty)
    pub topic: String,
    /// Optional partitioning key
    pub key: Option<Bytes>,
    /// Payload, possibly empty
    pub payload: Bytes,
}

impl Record {
    /// Create a keyless record
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
        }
    }

    /// Attach a partitioning key
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Total size of key and payload in bytes
    pub fn size(&self) -> usize {
        self.payload.len() + self.key.as_ref().map_or(0, |k| k.len())
    }
}
