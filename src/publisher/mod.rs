//! Publisher
//!
//! Delivers records to the broker. One [`Publisher`] is created per bridge and
//! shared by every session; its variant is fixed at construction:
//!
//! - **Blocking**: `send` returns once the broker acknowledged the record.
//! - **Buffered**: `send` returns once the record is queued; acknowledgments
//!   are consumed out of line by a drain task.

mod blocking;
mod buffered;
mod client;
#[cfg(feature = "kafka")]
mod kafka;
mod memory;

pub use blocking::BlockingPublisher;
pub use buffered::{BufferedConfig, BufferedPublisher, DeliveryReport};
pub use client::{BrokerClient, Delivery};
#[cfg(feature = "kafka")]
pub use kafka::KafkaClient;
pub use memory::MemoryBroker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::PublisherConfig;
use crate::metrics::Metrics;
use crate::record::Record;

/// Publish error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The broker client could not reach the broker
    BrokerUnavailable(String),
    /// No acknowledgment within the deadline
    Timeout(Duration),
    /// The broker refused the record
    Rejected(String),
    /// The publisher has been shut down
    Closed,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::BrokerUnavailable(msg) => write!(f, "Broker unavailable: {}", msg),
            PublishError::Timeout(d) => write!(f, "No acknowledgment within {:?}", d),
            PublishError::Rejected(msg) => write!(f, "Record rejected: {}", msg),
            PublishError::Closed => write!(f, "Publisher closed"),
        }
    }
}

impl std::error::Error for PublishError {}

impl PublishError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::BrokerUnavailable(_) => "unavailable",
            PublishError::Timeout(_) => "timeout",
            PublishError::Rejected(_) => "rejected",
            PublishError::Closed => "closed",
        }
    }
}

/// Result of a successful `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Broker acknowledged the record (blocking mode)
    Delivered(Delivery),
    /// Record accepted into the queue (buffered mode)
    Enqueued,
}

/// Delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Wait for the broker acknowledgment of every record
    #[default]
    Sync,
    /// Queue records and observe acknowledgments out of line
    Async,
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishMode::Sync => write!(f, "sync"),
            PublishMode::Async => write!(f, "async"),
        }
    }
}

/// Counters kept by every publisher
#[derive(Debug, Default)]
pub struct PublisherStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl PublisherStats {
    /// Records accepted into the queue (buffered mode only)
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Records acknowledged by the broker
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Records the broker client failed to deliver
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Sends records to the broker in blocking or buffered mode
pub enum Publisher {
    Blocking(BlockingPublisher),
    Buffered(BufferedPublisher),
}

impl Publisher {
    /// Blocking publisher waiting at most `ack_timeout` per record
    pub fn blocking(client: Arc<dyn BrokerClient>, ack_timeout: Duration) -> Self {
        Publisher::Blocking(BlockingPublisher::new(client, ack_timeout))
    }

    /// Buffered publisher; spawns its background tasks on the current runtime
    pub fn buffered(
        client: Arc<dyn BrokerClient>,
        config: BufferedConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Publisher::Buffered(BufferedPublisher::new(client, config, metrics))
    }

    /// Build the variant selected by `config.mode`
    pub fn from_config(
        client: Arc<dyn BrokerClient>,
        config: &PublisherConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        match config.mode {
            PublishMode::Sync => Self::blocking(client, config.ack_timeout),
            PublishMode::Async => Self::buffered(
                client,
                BufferedConfig {
                    queue_capacity: config.queue_capacity,
                    max_in_flight: config.max_in_flight,
                },
                metrics,
            ),
        }
    }

    pub fn mode(&self) -> PublishMode {
        match self {
            Publisher::Blocking(_) => PublishMode::Sync,
            Publisher::Buffered(_) => PublishMode::Async,
        }
    }

    /// Publish one record
    pub async fn send(&self, record: Record) -> Result<Ack, PublishError> {
        match self {
            Publisher::Blocking(p) => p.send(record).await,
            Publisher::Buffered(p) => p.send(record).await,
        }
    }

    /// Stop accepting records and flush, waiting at most `grace`
    pub async fn close(&self, grace: Duration) -> Result<(), PublishError> {
        match self {
            Publisher::Blocking(p) => p.close(grace).await,
            Publisher::Buffered(p) => p.close(grace).await,
        }
    }

    pub fn stats(&self) -> &PublisherStats {
        match self {
            Publisher::Blocking(p) => p.stats(),
            Publisher::Buffered(p) => p.stats(),
        }
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("mode", &self.mode())
            .field("delivered", &self.stats().delivered())
            .field("failed", &self.stats().failed())
            .finish()
    }
}
