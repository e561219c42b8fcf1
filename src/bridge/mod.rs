//! Bridge
//!
//! Accepts client connections and runs each one as a [`Session`] on its own
//! task. All sessions share one [`Publisher`] and one [`Registry`]; nothing
//! else is shared between them.
//!
//! Shutdown order: stop accepting, signal every registered session, wait for
//! the registry to empty (bounded by the grace period), then close the
//! publisher so queued records get their chance to drain.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::publisher::Publisher;
use crate::registry::{Registry, SessionHandle};
use crate::session::{Session, SessionConfig};
use crate::transform::{EnvelopeTransform, Transform};
use crate::transport::{
    Acceptor, CloseReason, Connection, PendingConnection, TransportConfig, WsAcceptor,
};


/// Bridge settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Request path clients connect to
    pub path: String,
    /// Per-session limits and timers; `max_message_size` is also the
    /// WebSocket codec limit
    pub session: SessionConfig,
    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,
    /// Time allowed for a client to complete the handshake
    pub handshake_timeout: Duration,
    /// Default grace period for `shutdown`
    pub shutdown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            session: SessionConfig::default(),
            max_connections: 0,
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl BridgeConfig {
    /// WebSocket listener settings, sharing the session's message limit
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            path: self.path.clone(),
            max_message_size: self.session.max_message_size,
            ..Default::default()
        }
    }
}

/// Bridge error types
#[derive(Debug)]
pub enum BridgeError {
    /// The listener could not be bound
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// Other listener I/O failure
    Io(std::io::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Bind { addr, source } => {
                write!(f, "Failed to bind {}: {}", addr, source)
            }
            BridgeError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Bind { source, .. } => Some(source),
            BridgeError::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(e)
    }
}

/// State shared with every connection task
struct Shared {
    registry: Arc<Registry>,
    publisher: Arc<Publisher>,
    transform: Arc<dyn Transform>,
    metrics: Option<Arc<Metrics>>,
    session: SessionConfig,
    stopping: AtomicBool,
    /// Connections between accept and session end, handshakes included
    active: AtomicUsize,
}

/// Releases a connection slot when the connection task ends
struct Slot(Arc<Shared>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// WebSocket to Kafka bridge
pub struct Bridge {
    config: BridgeConfig,
    shared: Arc<Shared>,
    shutdown: broadcast::Sender<()>,
}

impl Bridge {
    /// Create a bridge publishing through `publisher`. The publisher mode is
    /// fixed from here on.
    pub fn new(
        config: BridgeConfig,
        publisher: impl Into<Arc<Publisher>>,
        transform: Arc<dyn Transform>,
    ) -> Self {
        Self::builder(publisher)
            .config(config)
            .transform(transform)
            .build()
    }

    pub fn builder(publisher: impl Into<Arc<Publisher>>) -> BridgeBuilder {
        BridgeBuilder {
            config: BridgeConfig::default(),
            publisher: publisher.into(),
            transform: None,
            metrics: None,
        }
    }

    /// Bind a WebSocket listener on `addr` and run until stopped
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), BridgeError> {
        let acceptor = WsAcceptor::bind(addr, self.config.transport())
            .await
            .map_err(|source| BridgeError::Bind { addr, source })?;
        info!(
            "Listening on ws://{}{}",
            acceptor.local_addr()?,
            self.config.path
        );
        self.run(acceptor).await
    }

    /// Accept connections from `acceptor` until `stop` is called.
    ///
    /// Accept and handshake failures are logged and do not end the loop.
    pub async fn run<A: Acceptor>(&self, acceptor: A) -> Result<(), BridgeError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Starting accept loop");
        loop {
            let accepted = tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break,
                accepted = acceptor.accept() => accepted,
            };

            match accepted {
                Ok((peer, pending)) => {
                    debug!(peer = %peer, "New connection");
                    self.handle_connection(peer, pending);
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }

        info!("Accept loop stopped");
        Ok(())
    }

    /// Spawn the task that completes the handshake and runs the session
    fn handle_connection<C: Connection>(&self, peer: SocketAddr, pending: PendingConnection<C>) {
        let shared = self.shared.clone();
        let active = shared.active.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = Slot(shared.clone());
        let over_limit = self.config.max_connections != 0 && active > self.config.max_connections;
        let handshake_timeout = self.config.handshake_timeout;

        tokio::spawn(async move {
            let _slot = slot;

            let mut connection = match tokio::time::timeout(handshake_timeout, pending).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => {
                    debug!(peer = %peer, "Handshake failed: {}", e);
                    if let Some(metrics) = &shared.metrics {
                        metrics.connection_rejected("handshake");
                    }
                    return;
                }
                Err(_) => {
                    debug!(peer = %peer, "Handshake timed out after {:?}", handshake_timeout);
                    if let Some(metrics) = &shared.metrics {
                        metrics.connection_rejected("handshake_timeout");
                    }
                    return;
                }
            };

            if over_limit {
                warn!(peer = %peer, "Connection limit reached, rejecting");
                if let Some(metrics) = &shared.metrics {
                    metrics.connection_rejected("limit");
                }
                connection.close(CloseReason::Overloaded).await;
                return;
            }

            let registration = shared.registry.register(peer);
            // A stop that raced with the handshake must still reach this session
            if shared.stopping.load(Ordering::SeqCst) {
                registration.handle().close();
            }

            let session = Session::new(
                registration,
                connection,
                shared.publisher.clone(),
                shared.transform.clone(),
                shared.session.clone(),
            )
            .with_metrics(shared.metrics.clone());

            let summary = session.run().await;
            debug!(
                session = %summary.id,
                peer = %summary.peer,
                reason = %summary.close_reason,
                read = summary.messages_read,
                published = summary.published,
                dropped = summary.transform_failures + summary.publish_failures,
                "Session finished after {:?}",
                summary.duration
            );
        });
    }

    /// Stop accepting, close every session, wait up to `grace` for them to
    /// finish, then close the publisher.
    pub async fn stop(&self, grace: Duration) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            debug!("Bridge already stopping");
        }
        let _ = self.shutdown.send(());

        let signalled = self.shared.registry.close_all();
        info!("Shutting down, closing {} sessions", signalled);

        let started = tokio::time::Instant::now();
        if !self.shared.registry.wait_empty(grace).await {
            warn!(
                "{} sessions still open after {:?}",
                self.shared.registry.len(),
                grace
            );
        }

        let remaining = grace.saturating_sub(started.elapsed());
        if let Err(e) = self.shared.publisher.close(remaining).await {
            warn!("Publisher did not close cleanly: {}", e);
        }

        let stats = self.shared.publisher.stats();
        info!(
            delivered = stats.delivered(),
            failed = stats.failed(),
            "Bridge stopped"
        );
    }

    /// Stop with the configured grace period
    pub async fn shutdown(&self) {
        self.stop(self.config.shutdown_grace).await;
    }

    pub fn session_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Open connections, including those still in their handshake
    pub fn connection_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Snapshot of the live sessions
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.shared.registry.enumerate()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.shared.publisher
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }
}

/// Builder for [`Bridge`]
pub struct BridgeBuilder {
    config: BridgeConfig,
    publisher: Arc<Publisher>,
    transform: Option<Arc<dyn Transform>>,
    metrics: Option<Arc<Metrics>>,
}

impl BridgeBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`EnvelopeTransform`] with data payloads
    pub fn transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn build(self) -> Bridge {
        let (shutdown, _) = broadcast::channel(1);
        let transform = self
            .transform
            .unwrap_or_else(|| Arc::new(EnvelopeTransform::default()));

        Bridge {
            shared: Arc::new(Shared {
                registry: Arc::new(Registry::new()),
                publisher: self.publisher,
                transform,
                metrics: self.metrics,
                session: self.config.session.clone(),
                stopping: AtomicBool::new(false),
                active: AtomicUsize::new(0),
            }),
            config: self.config,
            shutdown,
        }
    }
}
