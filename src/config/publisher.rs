//! Publisher configuration

use std::time::Duration;

use serde::Deserialize;

use crate::publisher::PublishMode;

/// How records leave the bridge
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// sync waits for every acknowledgment, async queues records
    pub mode: PublishMode,
    /// Longest wait for one acknowledgment (sync)
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Records queued before senders wait (async)
    pub queue_capacity: usize,
    /// Concurrent broker sends (async)
    pub max_in_flight: usize,
    /// Time allowed for draining at shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            mode: PublishMode::Sync,
            ack_timeout: Duration::from_secs(30),
            queue_capacity: 1024,
            max_in_flight: 64,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
