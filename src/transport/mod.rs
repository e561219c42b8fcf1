//! Transport Layer
//!
//! The bridge consumes connections through two small traits so the session
//! logic never depends on WebSocket framing:
//!
//! - [`Acceptor`] yields newly accepted connections whose handshake is still
//!   pending, so the accept loop never waits on a slow client.
//! - [`Connection`] yields whole messages and closes with a reason.

mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use websocket::{TransportConfig, WsAcceptor, WsConnection};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;

/// Kind of an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl MessageKind {
    /// Data frames are transformed; control frames never are
    pub fn is_data(self) -> bool {
        matches!(self, MessageKind::Text | MessageKind::Binary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Binary => "binary",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Close => "close",
        }
    }
}

/// One message read from a client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: MessageKind,
    pub data: Bytes,
}

impl InboundMessage {
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Text,
            data: data.into(),
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Binary,
            data: data.into(),
        }
    }

    pub fn control(kind: MessageKind) -> Self {
        Self {
            kind,
            data: Bytes::new(),
        }
    }
}

/// Connection error types
#[derive(Debug)]
pub enum ConnectionError {
    /// Reading from the connection failed
    ReadFailed(String),
    /// A frame exceeded the read limit
    OversizedMessage { size: usize, limit: usize },
    /// No frame arrived within the idle deadline
    IdleTimeout,
    /// The peer closed the connection
    Closed,
    /// The transport handshake failed
    Handshake(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ReadFailed(e) => write!(f, "Read failed: {}", e),
            ConnectionError::OversizedMessage { size, limit } => {
                write!(f, "Message of {} bytes exceeds limit of {} bytes", size, limit)
            }
            ConnectionError::IdleTimeout => write!(f, "Idle timeout"),
            ConnectionError::Closed => write!(f, "Connection closed"),
            ConnectionError::Handshake(e) => write!(f, "Handshake failed: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::ReadFailed(e.to_string())
    }
}

/// Why the bridge is closing a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer asked to close, or the stream ended
    Normal,
    /// The bridge is shutting down
    Shutdown,
    /// A frame exceeded the read limit
    TooLarge,
    /// No traffic within the idle deadline
    Idle,
    /// The bridge is at its connection limit
    Overloaded,
    /// Transport error
    Error,
}

impl CloseReason {
    /// Metric label
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Normal => "normal",
            CloseReason::Shutdown => "shutdown",
            CloseReason::TooLarge => "too_large",
            CloseReason::Idle => "idle",
            CloseReason::Overloaded => "overloaded",
            CloseReason::Error => "error",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Normal => "normal",
            CloseReason::Shutdown => "shutdown",
            CloseReason::TooLarge => "message too large",
            CloseReason::Idle => "idle timeout",
            CloseReason::Overloaded => "overloaded",
            CloseReason::Error => "error",
        };
        f.write_str(s)
    }
}

/// A client connection delivering whole messages
#[async_trait]
pub trait Connection: Send + 'static {
    /// Remote address of the client
    fn peer_addr(&self) -> SocketAddr;

    /// Read the next message, control frames included.
    ///
    /// Must be cancel-safe: dropping the future loses no message. End of
    /// stream is reported as `ConnectionError::Closed`.
    async fn recv(&mut self) -> Result<InboundMessage, ConnectionError>;

    /// Send a keepalive ping
    async fn ping(&mut self) -> Result<(), ConnectionError>;

    /// Close the connection, telling the peer why when the transport allows
    async fn close(&mut self, reason: CloseReason);
}

/// Connection whose transport handshake has not completed yet
pub type PendingConnection<C> = Pin<Box<dyn Future<Output = Result<C, ConnectionError>> + Send>>;

/// Source of new client connections
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    type Connection: Connection;

    /// Wait for the next client. Errors are per-attempt and not fatal to the
    /// acceptor.
    async fn accept(
        &self,
    ) -> Result<(SocketAddr, PendingConnection<Self::Connection>), std::io::Error>;
}
