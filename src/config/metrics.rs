//! Metrics endpoint configuration
//!
//! The `[metrics]` section. When enabled, the binary serves the bridge
//! counters and health probes on their own HTTP listener, next to the
//! WebSocket one.

use std::net::SocketAddr;

use serde::Deserialize;

/// Where the Prometheus scrape endpoint listens
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Start the listener for /metrics, /health and /ready
    pub enabled: bool,
    /// HTTP listener address; must not collide with `server.bind`
    pub bind: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl MetricsConfig {
    pub(super) fn validate(&self, server_bind: SocketAddr) -> Result<(), String> {
        if self.enabled && self.bind == server_bind {
            return Err(format!(
                "metrics.bind ({}) must differ from server.bind",
                self.bind
            ));
        }
        Ok(())
    }
}
