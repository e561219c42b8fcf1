//! Message Transform
//!
//! Turns the raw bytes of one client message into a [`Record`]. A transform is
//! a pure function: it holds no mutable state and is invoked concurrently from
//! every session.
//!
//! # Default envelope
//!
//! ```json
//! {"id": "42", "type": "orders", "data": {"sku": "A-1"}}
//! ```
//!
//! `type` becomes the topic, `id` the record key, and the payload is derived
//! from `data` or from the whole envelope depending on [`PayloadMode`].

mod validation;

pub use validation::{validate_topic_name, MAX_TOPIC_LENGTH};

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::record::Record;

/// Transform error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Input is not a well-formed envelope
    Malformed(String),
    /// Envelope names a topic the broker would refuse
    InvalidTopic(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            TransformError::InvalidTopic(msg) => write!(f, "Invalid topic: {}", msg),
        }
    }
}

impl std::error::Error for TransformError {}

impl From<serde_json::Error> for TransformError {
    fn from(e: serde_json::Error) -> Self {
        TransformError::Malformed(e.to_string())
    }
}

/// Derives a record from raw message bytes
///
/// Any `Fn(&[u8]) -> Result<Record, TransformError>` closure is a transform,
/// so custom routing can be plugged into the bridge without a new type.
pub trait Transform: Send + Sync {
    fn transform(&self, raw: &[u8]) -> Result<Record, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&[u8]) -> Result<Record, TransformError> + Send + Sync,
{
    fn transform(&self, raw: &[u8]) -> Result<Record, TransformError> {
        self(raw)
    }
}

/// Which bytes of the envelope become the record payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Only the `data` field (strings are unquoted, other values kept verbatim)
    #[default]
    Data,
    /// The entire raw envelope
    Envelope,
}

impl fmt::Display for PayloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadMode::Data => write!(f, "data"),
            PayloadMode::Envelope => write!(f, "envelope"),
        }
    }
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(default, borrow)]
    id: Option<Cow<'a, str>>,
    #[serde(rename = "type", borrow)]
    kind: Cow<'a, str>,
    #[serde(default, borrow)]
    data: Option<&'a RawValue>,
}

/// The default JSON envelope transform
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeTransform {
    mode: PayloadMode,
}

impl EnvelopeTransform {
    pub fn new(mode: PayloadMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    fn data_payload(data: Option<&RawValue>) -> Result<Bytes, TransformError> {
        let Some(raw) = data else {
            return Ok(Bytes::new());
        };
        let text = raw.get();
        if text.starts_with('"') {
            let s: String = serde_json::from_str(text)?;
            Ok(Bytes::from(s.into_bytes()))
        } else {
            Ok(Bytes::copy_from_slice(text.as_bytes()))
        }
    }
}

/// The derived `Envelope` decoder also accepts arrays by field position, so
/// the root must be checked before decoding.
fn ensure_object(raw: &[u8]) -> Result<(), TransformError> {
    match raw
        .iter()
        .copied()
        .find(|&b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
    {
        Some(b'{') => Ok(()),
        Some(_) => Err(TransformError::Malformed(
            "envelope must be a JSON object".to_string(),
        )),
        None => Err(TransformError::Malformed("empty message".to_string())),
    }
}

impl Transform for EnvelopeTransform {
    fn transform(&self, raw: &[u8]) -> Result<Record, TransformError> {
        ensure_object(raw)?;
        let envelope: Envelope<'_> = serde_json::from_slice(raw)?;

        if envelope.kind.is_empty() {
            return Err(TransformError::Malformed("empty type".to_string()));
        }
        validate_topic_name(&envelope.kind)
            .map_err(|e| TransformError::InvalidTopic(format!("{}: {:?}", e, envelope.kind)))?;

        let payload = match self.mode {
            PayloadMode::Data => Self::data_payload(envelope.data)?,
            PayloadMode::Envelope => Bytes::copy_from_slice(raw),
        };

        Ok(Record {
            topic: envelope.kind.into_owned(),
            key: envelope
                .id
                .map(|id| Bytes::from(id.into_owned().into_bytes())),
            payload,
        })
    }
}

#[cfg(test)]
mod tests;
