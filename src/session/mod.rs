//! Connection Session
//!
//! One session owns one client connection for its whole life:
//! `Created -> Reading -> Closed`, with no reconnect. While reading, every
//! data frame goes through the transform and is published before the next
//! frame is read, so records from one client keep their read order.
//!
//! Per-message failures (bad envelope, broker trouble) drop that message and
//! the session keeps reading. Only connection-level events end a session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::metrics::Metrics;
use crate::publisher::{Ack, Publisher};
use crate::registry::{Registration, SessionId};
use crate::transform::Transform;
use crate::transport::{CloseReason, Connection, ConnectionError, InboundMessage, MessageKind};

/// Per-connection limits and timers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest data frame accepted, in bytes
    pub max_message_size: usize,
    /// Close the session when no frame arrives for this long
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Interval between keepalive pings, 9/10 of `idle_timeout` when unset
    #[serde(default, with = "humantime_serde::option")]
    pub ping_interval: Option<Duration>,
    /// Replace newlines with spaces and trim text frames before transforming
    pub normalize_text: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: 512,
            idle_timeout: Duration::from_secs(60),
            ping_interval: None,
            normalize_text: true,
        }
    }
}

impl SessionConfig {
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval.unwrap_or(self.idle_timeout * 9 / 10)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Reading,
    Closed,
}

/// What a finished session did
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub peer: SocketAddr,
    /// Data frames read
    pub messages_read: u64,
    /// Records accepted by the publisher
    pub published: u64,
    /// Messages dropped because they could not be transformed
    pub transform_failures: u64,
    /// Messages dropped because the publisher refused them
    pub publish_failures: u64,
    pub close_reason: CloseReason,
    pub duration: Duration,
}

enum Event {
    Frame(Result<InboundMessage, ConnectionError>),
    Ping,
    CloseRequested,
    Idle,
}

/// Keeps the live-connection gauge honest even if the session task panics
struct LiveConnection {
    metrics: Option<Arc<Metrics>>,
    reason: &'static str,
}

impl LiveConnection {
    fn open(metrics: Option<Arc<Metrics>>) -> Self {
        if let Some(metrics) = &metrics {
            metrics.client_connected();
        }
        Self {
            metrics,
            reason: "panic",
        }
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        if let Some(metrics) = &self.metrics {
            metrics.client_disconnected(self.reason);
        }
    }
}

/// A single client session
pub struct Session<C: Connection> {
    registration: Registration,
    connection: C,
    publisher: Arc<Publisher>,
    transform: Arc<dyn Transform>,
    config: SessionConfig,
    metrics: Option<Arc<Metrics>>,
    state: SessionState,
    messages_read: u64,
    published: u64,
    transform_failures: u64,
    publish_failures: u64,
}

impl<C: Connection> Session<C> {
    /// Create a session for an already registered connection
    pub fn new(
        registration: Registration,
        connection: C,
        publisher: Arc<Publisher>,
        transform: Arc<dyn Transform>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registration,
            connection,
            publisher,
            transform,
            config,
            metrics: None,
            state: SessionState::Created,
            messages_read: 0,
            published: 0,
            transform_failures: 0,
            publish_failures: 0,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn id(&self) -> SessionId {
        self.registration.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Read until the connection ends or the session is told to close.
    ///
    /// Deregistration happens when the session is dropped, which also covers
    /// unwinding out of this future.
    pub async fn run(mut self) -> SessionSummary {
        let started = Instant::now();
        let id = self.id();
        let peer = self.connection.peer_addr();
        let mut live = LiveConnection::open(self.metrics.clone());

        self.state = SessionState::Reading;
        debug!(session = %id, peer = %peer, "Session reading");

        let reason = self.read_loop().await;
        live.reason = reason.as_str();

        self.state = SessionState::Closed;
        debug!(
            session = %id,
            peer = %peer,
            reason = %reason,
            read = self.messages_read,
            published = self.published,
            "Session closed"
        );

        SessionSummary {
            id,
            peer,
            messages_read: self.messages_read,
            published: self.published,
            transform_failures: self.transform_failures,
            publish_failures: self.publish_failures,
            close_reason: reason,
            duration: started.elapsed(),
        }
    }

    async fn read_loop(&mut self) -> CloseReason {
        let id = self.id();
        let handle = self.registration.handle().clone();
        let idle_timeout = self.config.idle_timeout;
        let mut deadline = tokio::time::Instant::now() + idle_timeout;

        // interval_at panics on a zero period
        let ping_interval = self.config.ping_interval().max(Duration::from_millis(1));
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                biased;
                _ = handle.closed() => Event::CloseRequested,
                _ = ticker.tick() => Event::Ping,
                result = tokio::time::timeout_at(deadline, self.connection.recv()) => match result {
                    Ok(frame) => Event::Frame(frame),
                    Err(_) => Event::Idle,
                },
            };

            match event {
                Event::CloseRequested => {
                    return self.close(CloseReason::Shutdown).await;
                }
                Event::Ping => {
                    if let Err(e) = self.connection.ping().await {
                        debug!(session = %id, "Ping failed: {}", e);
                        return self.close(CloseReason::Error).await;
                    }
                }
                Event::Idle => {
                    debug!(session = %id, "{}", ConnectionError::IdleTimeout);
                    return self.close(CloseReason::Idle).await;
                }
                Event::Frame(Ok(message)) => {
                    deadline = tokio::time::Instant::now() + idle_timeout;
                    if let Some(metrics) = &self.metrics {
                        metrics.message_received(message.kind.as_str(), message.data.len());
                    }

                    match message.kind {
                        MessageKind::Text | MessageKind::Binary => {
                            let size = message.data.len();
                            if size > self.config.max_message_size {
                                let err = ConnectionError::OversizedMessage {
                                    size,
                                    limit: self.config.max_message_size,
                                };
                                debug!(session = %id, "{}", err);
                                return self.close(CloseReason::TooLarge).await;
                            }
                            self.messages_read += 1;
                            self.handle_message(message).await;
                        }
                        MessageKind::Ping | MessageKind::Pong => {
                            trace!(session = %id, kind = message.kind.as_str(), "Keepalive");
                        }
                        MessageKind::Close => {
                            return self.close(CloseReason::Normal).await;
                        }
                    }
                }
                Event::Frame(Err(e)) => {
                    return match e {
                        // Nothing left to tell the peer
                        ConnectionError::Closed => CloseReason::Normal,
                        ConnectionError::OversizedMessage { .. } => {
                            debug!(session = %id, "{}", e);
                            self.close(CloseReason::TooLarge).await
                        }
                        ConnectionError::IdleTimeout => self.close(CloseReason::Idle).await,
                        ConnectionError::ReadFailed(_) | ConnectionError::Handshake(_) => {
                            debug!(session = %id, "{}", e);
                            self.close(CloseReason::Error).await
                        }
                    };
                }
            }
        }
    }

    async fn close(&mut self, reason: CloseReason) -> CloseReason {
        self.connection.close(reason).await;
        reason
    }

    /// Transform and publish one data frame. Failures are logged and counted.
    async fn handle_message(&mut self, message: InboundMessage) {
        let id = self.id();
        let raw = if message.kind == MessageKind::Text && self.config.normalize_text {
            normalize_text(message.data)
        } else {
            message.data
        };

        let record = match self.transform.transform(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(session = %id, error = %e, "Dropping message: transform failed");
                self.transform_failures += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.transform_failed();
                }
                return;
            }
        };

        let topic = record.topic.clone();
        let started = Instant::now();
        match self.publisher.send(record).await {
            Ok(ack) => {
                self.published += 1;
                match ack {
                    Ack::Delivered(delivery) => {
                        trace!(
                            session = %id,
                            topic = %topic,
                            partition = delivery.partition,
                            offset = delivery.offset,
                            "Record delivered"
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.publish_completed("ok", started.elapsed());
                        }
                    }
                    Ack::Enqueued => {
                        trace!(session = %id, topic = %topic, "Record enqueued");
                        if let Some(metrics) = &self.metrics {
                            metrics.publish_enqueued();
                        }
                    }
                }
            }
            Err(e) => {
                warn!(session = %id, topic = %topic, error = %e, "Dropping message: publish failed");
                self.publish_failures += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.publish_completed(e.kind(), started.elapsed());
                }
            }
        }
    }
}

/// Replace newlines with spaces and trim surrounding whitespace
pub fn normalize_text(data: Bytes) -> Bytes {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    let trimmed = data.slice(start..end);

    if !trimmed.contains(&b'\n') {
        return trimmed;
    }

    let mut out = BytesMut::from(&trimmed[..]);
    for b in out.iter_mut() {
        if *b == b'\n' {
            *b = b' ';
        }
    }
    out.freeze()
}
