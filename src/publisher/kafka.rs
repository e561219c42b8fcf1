//! Kafka broker client
//!
//! Wraps rdkafka's `FutureProducer`. Connection management, partitioning and
//! retries are librdkafka's; this layer only maps records and errors.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::debug;

use super::{BrokerClient, Delivery, PublishError};
use crate::config::KafkaConfig;
use crate::record::Record;

/// How long `send` may wait for room in librdkafka's local queue
const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaClient {
    producer: FutureProducer,
    queue_timeout: Duration,
    name: String,
}

impl KafkaClient {
    /// Create the producer. Fails if the configuration is rejected by
    /// librdkafka; broker reachability is only discovered on first send.
    pub fn new(config: &KafkaConfig) -> Result<Self, PublishError> {
        if config.brokers.is_empty() {
            return Err(PublishError::BrokerUnavailable(
                "no broker addresses configured".to_string(),
            ));
        }

        let client_config = Self::client_config(config);
        let producer: FutureProducer = client_config.create().map_err(|e| {
            PublishError::BrokerUnavailable(format!("Failed to create producer: {}", e))
        })?;

        debug!("Kafka producer created for {}", config.brokers.join(","));

        Ok(Self {
            producer,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            name: format!("kafka({})", config.brokers.join(",")),
        })
    }

    fn client_config(config: &KafkaConfig) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.brokers.join(","))
            .set("client.id", &config.client_id)
            .set("acks", &config.acks)
            .set(
                "message.timeout.ms",
                config.message_timeout.as_millis().to_string(),
            )
            .set("linger.ms", config.linger.as_millis().to_string())
            .set("compression.type", &config.compression);

        // Raw librdkafka properties win over the typed settings above
        for (key, value) in &config.properties {
            client_config.set(key, value);
        }
        client_config
    }
}

fn map_error(err: KafkaError) -> PublishError {
    match err {
        KafkaError::MessageProduction(code) => match code {
            RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::QueueFull => PublishError::BrokerUnavailable(code.to_string()),
            other => PublishError::Rejected(other.to_string()),
        },
        KafkaError::Canceled => PublishError::Closed,
        other => PublishError::BrokerUnavailable(other.to_string()),
    }
}

#[async_trait]
impl BrokerClient for KafkaClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, record: &Record) -> Result<Delivery, PublishError> {
        let mut kafka_record =
            FutureRecord::<[u8], [u8]>::to(&record.topic).payload(&record.payload[..]);
        if let Some(key) = &record.key {
            kafka_record = kafka_record.key(&key[..]);
        }

        self.producer
            .send(kafka_record, Timeout::After(self.queue_timeout))
            .await
            .map(|(partition, offset)| Delivery { partition, offset })
            .map_err(|(err, _)| map_error(err))
    }

    async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        // librdkafka's flush blocks the calling thread
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| PublishError::BrokerUnavailable(format!("Flush task failed: {}", e)))?
            .map_err(map_error)
    }
}
