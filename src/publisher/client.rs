//! Broker Client Abstraction
//!
//! The publisher never talks to a broker directly. It drives a [`BrokerClient`]
//! whose transport, partitioning and retries are its own business.

use std::time::Duration;

use async_trait::async_trait;

use super::PublishError;
use crate::record::Record;

/// Broker acknowledgment for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Trait for broker communication
///
/// Implemented by:
/// - `KafkaClient`: librdkafka producer (feature `kafka`)
/// - `MemoryBroker`: in-process broker for tests and embedding
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Name of this client, used in logs
    fn name(&self) -> &str;

    /// Send one record and wait for the broker acknowledgment
    ///
    /// Must be safe to call concurrently; any serialization the transport needs
    /// is the client's own responsibility.
    async fn send(&self, record: &Record) -> Result<Delivery, PublishError>;

    /// Wait for records buffered inside the client to be delivered
    async fn flush(&self, timeout: Duration) -> Result<(), PublishError>;
}
