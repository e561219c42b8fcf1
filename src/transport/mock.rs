//! In-memory transport for unit tests
//!
//! `pair` yields a scripted [`MockConnection`] and the [`MockClient`] that
//! feeds it. [`MockAcceptor`] hands out connections queued by a
//! [`MockDialer`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    Acceptor, CloseReason, Connection, ConnectionError, InboundMessage, PendingConnection,
};

pub(crate) type Frame = Result<InboundMessage, ConnectionError>;

#[derive(Default)]
struct Probe {
    pings: AtomicUsize,
    closed_with: Mutex<Option<CloseReason>>,
}

pub(crate) struct MockConnection {
    peer: SocketAddr,
    inbound: mpsc::UnboundedReceiver<Frame>,
    probe: Arc<Probe>,
}

/// Client side of a mock connection. Dropping it ends the stream.
pub(crate) struct MockClient {
    frames: Option<mpsc::UnboundedSender<Frame>>,
    probe: Arc<Probe>,
}

pub(crate) fn pair(peer: SocketAddr) -> (MockConnection, MockClient) {
    let (frames, inbound) = mpsc::unbounded_channel();
    let probe = Arc::new(Probe::default());
    (
        MockConnection {
            peer,
            inbound,
            probe: probe.clone(),
        },
        MockClient {
            frames: Some(frames),
            probe,
        },
    )
}

impl MockClient {
    pub(crate) fn send(&self, frame: Frame) {
        // The session may already be gone
        if let Some(frames) = &self.frames {
            let _ = frames.send(frame);
        }
    }

    /// End the stream while keeping the probe readable
    pub(crate) fn hang_up(&mut self) {
        self.frames = None;
    }

    pub(crate) fn send_text(&self, text: &str) {
        self.send(Ok(InboundMessage::text(Bytes::copy_from_slice(
            text.as_bytes(),
        ))));
    }

    pub(crate) fn pings(&self) -> usize {
        self.probe.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_with(&self) -> Option<CloseReason> {
        *self.probe.closed_with.lock()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn recv(&mut self) -> Result<InboundMessage, ConnectionError> {
        match self.inbound.recv().await {
            Some(frame) => frame,
            None => Err(ConnectionError::Closed),
        }
    }

    async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.probe.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) {
        *self.probe.closed_with.lock() = Some(reason);
    }
}

type Incoming = (SocketAddr, PendingConnection<MockConnection>);

pub(crate) struct MockAcceptor {
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
}

#[derive(Clone)]
pub(crate) struct MockDialer {
    tx: mpsc::UnboundedSender<Incoming>,
    next_port: Arc<AtomicUsize>,
}

pub(crate) fn acceptor() -> (MockAcceptor, MockDialer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockAcceptor {
            incoming: tokio::sync::Mutex::new(rx),
        },
        MockDialer {
            tx,
            next_port: Arc::new(AtomicUsize::new(40000)),
        },
    )
}

impl MockDialer {
    fn next_peer(&self) -> SocketAddr {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed) as u16;
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// Queue a connection whose handshake succeeds immediately
    pub(crate) fn connect(&self) -> MockClient {
        let peer = self.next_peer();
        let (connection, client) = pair(peer);
        let _ = self.tx.send((peer, Box::pin(async move { Ok(connection) })));
        client
    }

    /// Queue a connection with a custom handshake
    pub(crate) fn connect_pending(&self, pending: PendingConnection<MockConnection>) {
        let peer = self.next_peer();
        let _ = self.tx.send((peer, pending));
    }
}

#[async_trait]
impl Acceptor for MockAcceptor {
    type Connection = MockConnection;

    async fn accept(&self) -> std::io::Result<Incoming> {
        match self.incoming.lock().await.recv().await {
            Some(incoming) => Ok(incoming),
            // Like a listener with no more clients: wait forever
            None => std::future::pending().await,
        }
    }
}
