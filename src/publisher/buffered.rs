//! Buffered Publisher
//!
//! `send` hands the record to a bounded queue and returns as soon as the queue
//! accepts it. A dispatcher task feeds queued records to the broker client with
//! at most `max_in_flight` outstanding sends, and a drain task consumes the
//! resulting [`DeliveryReport`]s. Sends are started in queue order, so
//! records from one session reach the broker client in the order they were
//! read; only the acknowledgments overlap.
//!
//! A full queue makes `send` wait for space; this is the only flow control
//! between client ingestion and broker throughput.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::{Ack, BrokerClient, Delivery, PublishError, PublisherStats};
use crate::metrics::Metrics;
use crate::record::Record;

/// Outcome of one asynchronously delivered record
#[derive(Debug)]
pub struct DeliveryReport {
    pub topic: String,
    pub result: Result<Delivery, PublishError>,
    pub latency: Duration,
}

/// Buffered publisher settings
#[derive(Debug, Clone, Copy)]
pub struct BufferedConfig {
    /// Queue capacity (records accepted before `send` waits)
    pub queue_capacity: usize,
    /// Maximum concurrent broker sends issued by the dispatcher
    pub max_in_flight: usize,
}

impl Default for BufferedConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_in_flight: 64,
        }
    }
}

struct Workers {
    dispatcher: JoinHandle<()>,
    drain: JoinHandle<()>,
}

pub struct BufferedPublisher {
    queue: RwLock<Option<mpsc::Sender<Record>>>,
    client: Arc<dyn BrokerClient>,
    stats: Arc<PublisherStats>,
    workers: Mutex<Option<Workers>>,
}

impl BufferedPublisher {
    /// Create the publisher and spawn its dispatcher and drain tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        client: Arc<dyn BrokerClient>,
        config: BufferedConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let (report_tx, report_rx) = mpsc::channel(capacity);
        let stats = Arc::new(PublisherStats::default());

        let dispatcher = tokio::spawn(dispatch_loop(
            client.clone(),
            queue_rx,
            report_tx,
            config.max_in_flight.max(1),
        ));
        let drain = tokio::spawn(drain_loop(report_rx, stats.clone(), metrics));

        Self {
            queue: RwLock::new(Some(queue_tx)),
            client,
            stats,
            workers: Mutex::new(Some(Workers { dispatcher, drain })),
        }
    }

    /// Publisher with no dispatcher; the caller owns the queue's receiving end
    #[cfg(test)]
    pub(crate) fn detached(
        client: Arc<dyn BrokerClient>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Record>) {
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let publisher = Self {
            queue: RwLock::new(Some(queue_tx)),
            client,
            stats: Arc::new(PublisherStats::default()),
            workers: Mutex::new(None),
        };
        (publisher, queue_rx)
    }

    pub async fn send(&self, record: Record) -> Result<Ack, PublishError> {
        // Clone the sender so the lock is not held while waiting for space
        let sender = self.queue.read().clone().ok_or(PublishError::Closed)?;
        sender
            .send(record)
            .await
            .map_err(|_| PublishError::Closed)?;
        self.stats.record_enqueued();
        Ok(Ack::Enqueued)
    }

    /// Stop accepting records, then give the dispatcher and drain loop up to
    /// `grace` to finish what is already queued.
    pub async fn close(&self, grace: Duration) -> Result<(), PublishError> {
        let started = Instant::now();
        drop(self.queue.write().take());

        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            let finished = timeout(grace, async move {
                if let Err(e) = workers.dispatcher.await {
                    error!("Publisher dispatcher task failed: {}", e);
                }
                if let Err(e) = workers.drain.await {
                    error!("Publisher drain task failed: {}", e);
                }
            })
            .await;

            if finished.is_err() {
                warn!(
                    "Publisher did not drain within {:?}; abandoning queued records",
                    grace
                );
            }
        }

        let remaining = grace.saturating_sub(started.elapsed());
        self.client.flush(remaining).await
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }
}

async fn dispatch_loop(
    client: Arc<dyn BrokerClient>,
    queue: mpsc::Receiver<Record>,
    reports: mpsc::Sender<DeliveryReport>,
    max_in_flight: usize,
) {
    let records = stream::unfold(queue, |mut queue| async move {
        queue.recv().await.map(|record| (record, queue))
    });

    // `buffered` first polls each send in queue order, so the broker client
    // sees records in read order while up to `max_in_flight` await their ack
    let sends = records
        .map(move |record| {
            let client = client.clone();
            async move {
                let started = Instant::now();
                let result = client.send(&record).await;
                DeliveryReport {
                    topic: record.topic,
                    result,
                    latency: started.elapsed(),
                }
            }
        })
        .buffered(max_in_flight);
    tokio::pin!(sends);

    while let Some(report) = sends.next().await {
        if reports.send(report).await.is_err() {
            debug!("Delivery report dropped, drain loop is gone");
        }
    }
    debug!("Publisher dispatcher stopped");
}

async fn drain_loop(
    mut reports: mpsc::Receiver<DeliveryReport>,
    stats: Arc<PublisherStats>,
    metrics: Option<Arc<Metrics>>,
) {
    while let Some(report) = reports.recv().await {
        match &report.result {
            Ok(delivery) => {
                stats.record_delivered();
                debug!(
                    topic = %report.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Record delivered"
                );
            }
            Err(e) => {
                stats.record_failed();
                error!(topic = %report.topic, "Delivery failed: {}", e);
            }
        }
        if let Some(metrics) = &metrics {
            metrics.delivery_reported(report.result.is_ok(), report.latency);
        }
    }
    debug!("Publisher drain loop stopped");
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;
    use crate::publisher::MemoryBroker;

    #[tokio::test]
    async fn test_queue_of_n_accepts_n_then_blocks() {
        const N: usize = 4;
        let broker = Arc::new(MemoryBroker::new());
        let (publisher, mut queue) = BufferedPublisher::detached(broker, N);

        for i in 0..N {
            let accepted = timeout(
                Duration::from_millis(100),
                publisher.send(Record::new("t", format!("m{}", i))),
            )
            .await;
            assert!(matches!(accepted, Ok(Ok(Ack::Enqueued))), "send {} blocked", i);
        }

        // The N+1th send waits for space
        let mut blocked = task::spawn(publisher.send(Record::new("t", "overflow")));
        assert_pending!(blocked.poll());

        // Dequeue one record; the blocked send is woken and completes
        let first = queue.recv().await.unwrap();
        assert_eq!(&first.payload[..], b"m0");
        assert!(blocked.is_woken());
        assert!(matches!(assert_ready!(blocked.poll()), Ok(Ack::Enqueued)));
        drop(blocked);
        assert_eq!(publisher.stats().enqueued(), N as u64 + 1);
    }

    #[tokio::test]
    async fn test_records_reach_broker_in_order() {
        let broker = Arc::new(MemoryBroker::new());
        let publisher = BufferedPublisher::new(
            broker.clone(),
            BufferedConfig {
                queue_capacity: 8,
                max_in_flight: 1,
            },
            None,
        );

        for i in 0..20 {
            publisher
                .send(Record::new("orders", format!("{}", i)))
                .await
                .unwrap();
        }
        publisher.close(Duration::from_secs(2)).await.unwrap();

        let payloads: Vec<String> = broker
            .records()
            .iter()
            .map(|r| String::from_utf8(r.payload.to_vec()).unwrap())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(payloads, expected);
        assert_eq!(publisher.stats().delivered(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_keep_read_order() {
        for _ in 0..5 {
            let broker = Arc::new(MemoryBroker::new());
            let publisher = BufferedPublisher::new(broker.clone(), BufferedConfig::default(), None);

            for i in 0..500 {
                publisher
                    .send(Record::new("orders", i.to_string()))
                    .await
                    .unwrap();
            }
            publisher.close(Duration::from_secs(5)).await.unwrap();

            let payloads: Vec<String> = broker
                .records()
                .iter()
                .map(|r| String::from_utf8(r.payload.to_vec()).unwrap())
                .collect();
            let expected: Vec<String> = (0..500).map(|i| i.to_string()).collect();
            assert_eq!(payloads, expected);
            assert_eq!(publisher.stats().delivered(), 500);
        }
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_returned() {
        let broker = Arc::new(MemoryBroker::new());
        broker.set_failure(Some(PublishError::BrokerUnavailable("down".into())));
        let publisher = BufferedPublisher::new(broker.clone(), BufferedConfig::default(), None);

        let ack = publisher.send(Record::new("orders", "abc")).await.unwrap();
        assert_eq!(ack, Ack::Enqueued);

        publisher.close(Duration::from_secs(2)).await.unwrap();
        assert_eq!(publisher.stats().failed(), 1);
        assert_eq!(publisher.stats().delivered(), 0);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let broker = Arc::new(MemoryBroker::new());
        let publisher = BufferedPublisher::new(broker, BufferedConfig::default(), None);

        publisher.close(Duration::from_secs(1)).await.unwrap();
        let err = publisher.send(Record::new("t", "x")).await.unwrap_err();
        assert_eq!(err, PublishError::Closed);
    }
}
