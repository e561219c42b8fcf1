//! Blocking Publisher
//!
//! Every `send` waits for the broker acknowledgment of its record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use super::{Ack, BrokerClient, PublishError, PublisherStats};
use crate::record::Record;

pub struct BlockingPublisher {
    client: Arc<dyn BrokerClient>,
    ack_timeout: Duration,
    stats: PublisherStats,
    closed: AtomicBool,
}

impl BlockingPublisher {
    pub fn new(client: Arc<dyn BrokerClient>, ack_timeout: Duration) -> Self {
        Self {
            client,
            ack_timeout,
            stats: PublisherStats::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn send(&self, record: Record) -> Result<Ack, PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }

        let result = match timeout(self.ack_timeout, self.client.send(&record)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.ack_timeout)),
        };

        match result {
            Ok(delivery) => {
                self.stats.record_delivered();
                debug!(
                    topic = %record.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Record acknowledged"
                );
                Ok(Ack::Delivered(delivery))
            }
            Err(e) => {
                self.stats.record_failed();
                Err(e)
            }
        }
    }

    pub async fn close(&self, grace: Duration) -> Result<(), PublishError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.client.flush(grace).await
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::MemoryBroker;

    #[tokio::test]
    async fn test_send_waits_for_ack() {
        let broker = Arc::new(MemoryBroker::new());
        let publisher = BlockingPublisher::new(broker.clone(), Duration::from_secs(1));

        let ack = publisher
            .send(Record::new("orders", "abc"))
            .await
            .unwrap();

        assert!(matches!(ack, Ack::Delivered(d) if d.offset == 0));
        assert_eq!(broker.len(), 1);
        assert_eq!(publisher.stats().delivered(), 1);
    }

    #[tokio::test]
    async fn test_broker_failure_propagates() {
        let broker = Arc::new(MemoryBroker::new());
        broker.set_failure(Some(PublishError::BrokerUnavailable("down".into())));
        let publisher = BlockingPublisher::new(broker.clone(), Duration::from_secs(1));

        let err = publisher
            .send(Record::new("orders", "abc"))
            .await
            .unwrap_err();

        assert_eq!(err, PublishError::BrokerUnavailable("down".into()));
        assert_eq!(publisher.stats().failed(), 1);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn test_slow_ack_times_out() {
        let broker = Arc::new(MemoryBroker::new());
        broker.set_latency(Duration::from_secs(5));
        let publisher = BlockingPublisher::new(broker, Duration::from_millis(20));

        let err = publisher
            .send(Record::new("orders", "abc"))
            .await
            .unwrap_err();

        assert_eq!(err, PublishError::Timeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let broker = Arc::new(MemoryBroker::new());
        let publisher = BlockingPublisher::new(broker, Duration::from_secs(1));

        publisher.close(Duration::from_millis(10)).await.unwrap();
        let err = publisher.send(Record::new("t", "x")).await.unwrap_err();
        assert_eq!(err, PublishError::Closed);
    }
}
