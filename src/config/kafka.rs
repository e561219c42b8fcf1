//! Kafka producer configuration

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::Deserialize;

/// Kafka producer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Bootstrap brokers, as a list or a comma-separated string
    #[serde(deserialize_with = "deserialize_brokers")]
    pub brokers: Vec<String>,
    /// client.id reported to the brokers
    pub client_id: String,
    /// Required acknowledgments: all, 1 or 0
    pub acks: String,
    /// Give up on a record after this long (message.timeout.ms)
    #[serde(with = "humantime_serde")]
    pub message_timeout: Duration,
    /// Batching delay (linger.ms)
    #[serde(with = "humantime_serde")]
    pub linger: Duration,
    /// none, gzip, snappy, lz4 or zstd
    pub compression: String,
    /// Raw librdkafka properties, applied last
    pub properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            client_id: "kawka".to_string(),
            acks: "all".to_string(),
            message_timeout: Duration::from_secs(30),
            linger: Duration::from_millis(5),
            compression: "none".to_string(),
            properties: HashMap::new(),
        }
    }
}

/// Split a comma-separated peer list, dropping empty entries
pub fn parse_brokers(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn deserialize_brokers<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct BrokersVisitor;

    impl<'de> Visitor<'de> for BrokersVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a list of broker addresses or a comma-separated string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(parse_brokers(v))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut brokers = Vec::new();
            while let Some(entry) = seq.next_element::<String>()? {
                brokers.extend(parse_brokers(&entry));
            }
            Ok(brokers)
        }
    }

    deserializer.deserialize_any(BrokersVisitor)
}

const COMPRESSION_CODECS: &[&str] = &["none", "gzip", "snappy", "lz4", "zstd"];
const ACKS: &[&str] = &["all", "-1", "0", "1"];

impl KafkaConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if !COMPRESSION_CODECS.contains(&self.compression.as_str()) {
            return Err(format!(
                "kafka.compression must be one of {}, got '{}'",
                COMPRESSION_CODECS.join(", "),
                self.compression
            ));
        }
        if !ACKS.contains(&self.acks.as_str()) {
            return Err(format!(
                "kafka.acks must be all, 0 or 1, got '{}'",
                self.acks
            ));
        }
        if self.message_timeout.is_zero() {
            return Err("kafka.message_timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}
