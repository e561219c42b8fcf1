//! In-process broker client
//!
//! Keeps every acknowledged record in memory. Failures and acknowledgment
//! latency can be injected, which makes it the broker of choice for tests and
//! for embedding the bridge without Kafka.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{BrokerClient, Delivery, PublishError};
use crate::record::Record;

#[derive(Default)]
struct State {
    records: Vec<Record>,
    offsets: HashMap<String, i64>,
    failure: Option<PublishError>,
    latency: Duration,
}

#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
    appended: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send with `failure` until cleared with `None`
    pub fn set_failure(&self, failure: Option<PublishError>) {
        self.state.lock().failure = failure;
    }

    /// Delay every acknowledgment by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Snapshot of all acknowledged records in acknowledgment order
    pub fn records(&self) -> Vec<Record> {
        self.state.lock().records.clone()
    }

    /// Acknowledged records for one topic
    pub fn records_for(&self, topic: &str) -> Vec<Record> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` records were acknowledged.
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            // Register before checking so an append in between is not missed
            notified.as_mut().enable();
            if self.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.len() >= count;
            }
        }
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, record: &Record) -> Result<Delivery, PublishError> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let delivery = {
            let mut state = self.state.lock();
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }
            let offset = state.offsets.entry(record.topic.clone()).or_insert(0);
            let delivery = Delivery {
                partition: 0,
                offset: *offset,
            };
            *offset += 1;
            state.records.push(record.clone());
            delivery
        };

        self.appended.notify_waiters();
        Ok(delivery)
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_offsets_are_per_topic() {
        let broker = MemoryBroker::new();

        let a0 = broker.send(&Record::new("a", "1")).await.unwrap();
        let a1 = broker.send(&Record::new("a", "2")).await.unwrap();
        let b0 = broker.send(&Record::new("b", "3")).await.unwrap();

        assert_eq!((a0.offset, a1.offset, b0.offset), (0, 1, 0));
        assert_eq!(broker.records_for("a").len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let broker = MemoryBroker::new();
        broker.set_failure(Some(PublishError::Rejected("too large".into())));
        assert!(broker.send(&Record::new("a", "1")).await.is_err());

        broker.set_failure(None);
        assert!(broker.send(&Record::new("a", "1")).await.is_ok());
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for() {
        let broker = Arc::new(MemoryBroker::new());
        assert!(!broker.wait_for(1, Duration::from_millis(20)).await);

        let writer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.send(&Record::new("a", "1")).await.unwrap();
        });
        assert!(broker.wait_for(1, Duration::from_secs(1)).await);
    }
}
