//! Prometheus metrics for Kawka
//!
//! Exposes bridge counters at the /metrics endpoint. Sessions and publishers
//! take an `Option<Arc<Metrics>>`, so embedding without metrics costs nothing.

use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

mod server;

pub use server::MetricsServer;

/// All Kawka metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Connection metrics
    pub connections_total: IntCounter,
    pub connections_current: IntGauge,
    pub connections_maximum: IntGauge,
    pub connections_rejected_total: IntCounterVec,
    pub disconnections_total: IntCounterVec,

    // Inbound message metrics
    pub messages_received_total: IntCounterVec,
    pub bytes_received_total: IntCounter,
    pub transform_failures_total: IntCounter,

    // Publish metrics
    pub publish_total: IntCounterVec,
    pub publish_latency: Histogram,
    pub deliveries_total: IntCounterVec,
}

fn latency_buckets() -> Vec<f64> {
    vec![
        0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ]
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        // Connection metrics
        let connections_total = IntCounter::with_opts(Opts::new(
            "kawka_connections_total",
            "Total number of client connections since startup",
        ))
        .unwrap();

        let connections_current = IntGauge::with_opts(Opts::new(
            "kawka_connections_current",
            "Current number of connected clients",
        ))
        .unwrap();

        let connections_maximum = IntGauge::with_opts(Opts::new(
            "kawka_connections_maximum",
            "Maximum concurrent connections since startup",
        ))
        .unwrap();

        let connections_rejected_total = IntCounterVec::new(
            Opts::new(
                "kawka_connections_rejected_total",
                "Total connections refused before a session started",
            ),
            &["reason"],
        )
        .unwrap();

        let disconnections_total = IntCounterVec::new(
            Opts::new(
                "kawka_disconnections_total",
                "Total sessions closed by close reason",
            ),
            &["reason"],
        )
        .unwrap();

        // Inbound message metrics
        let messages_received_total = IntCounterVec::new(
            Opts::new(
                "kawka_messages_received_total",
                "Total frames received from clients by kind",
            ),
            &["kind"],
        )
        .unwrap();

        let bytes_received_total = IntCounter::with_opts(Opts::new(
            "kawka_bytes_received_total",
            "Total data bytes received from clients",
        ))
        .unwrap();

        let transform_failures_total = IntCounter::with_opts(Opts::new(
            "kawka_transform_failures_total",
            "Total messages dropped because they could not be transformed",
        ))
        .unwrap();

        // Publish metrics
        let publish_total = IntCounterVec::new(
            Opts::new(
                "kawka_publish_total",
                "Total publish attempts by result",
            ),
            &["result"],
        )
        .unwrap();

        let publish_latency = Histogram::with_opts(
            HistogramOpts::new(
                "kawka_publish_latency_seconds",
                "Time from publish to broker acknowledgment",
            )
            .buckets(latency_buckets()),
        )
        .unwrap();

        let deliveries_total = IntCounterVec::new(
            Opts::new(
                "kawka_deliveries_total",
                "Total buffered delivery reports by result",
            ),
            &["result"],
        )
        .unwrap();

        // Register all metrics
        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_current.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_maximum.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_rejected_total.clone()))
            .unwrap();
        registry
            .register(Box::new(disconnections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_received_total.clone()))
            .unwrap();
        registry
            .register(Box::new(bytes_received_total.clone()))
            .unwrap();
        registry
            .register(Box::new(transform_failures_total.clone()))
            .unwrap();
        registry.register(Box::new(publish_total.clone())).unwrap();
        registry
            .register(Box::new(publish_latency.clone()))
            .unwrap();
        registry
            .register(Box::new(deliveries_total.clone()))
            .unwrap();

        Metrics {
            registry,
            connections_total,
            connections_current,
            connections_maximum,
            connections_rejected_total,
            disconnections_total,
            messages_received_total,
            bytes_received_total,
            transform_failures_total,
            publish_total,
            publish_latency,
            deliveries_total,
        }
    }

    // Connection helpers

    pub fn client_connected(&self) {
        self.connections_total.inc();
        self.connections_current.inc();
        let current = self.connections_current.get();
        if current > self.connections_maximum.get() {
            self.connections_maximum.set(current);
        }
    }

    pub fn client_disconnected(&self, reason: &str) {
        self.connections_current.dec();
        self.disconnections_total.with_label_values(&[reason]).inc();
    }

    pub fn connection_rejected(&self, reason: &str) {
        self.connections_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    // Message helpers

    pub fn message_received(&self, kind: &str, bytes: usize) {
        self.messages_received_total.with_label_values(&[kind]).inc();
        self.bytes_received_total.inc_by(bytes as u64);
    }

    pub fn transform_failed(&self) {
        self.transform_failures_total.inc();
    }

    /// Record the outcome of one `Publisher::send`
    pub fn publish_completed(&self, result: &str, latency: Duration) {
        self.publish_total.with_label_values(&[result]).inc();
        self.publish_latency.observe(latency.as_secs_f64());
    }

    /// Record a send that was queued rather than acknowledged
    pub fn publish_enqueued(&self) {
        self.publish_total.with_label_values(&["enqueued"]).inc();
    }

    /// Record a buffered delivery report
    pub fn delivery_reported(&self, ok: bool, latency: Duration) {
        let result = if ok { "ok" } else { "failed" };
        self.deliveries_total.with_label_values(&[result]).inc();
        if ok {
            self.publish_latency.observe(latency.as_secs_f64());
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
