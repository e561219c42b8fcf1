//! WebSocket Transport
//!
//! Accepts WebSocket clients with tokio-tungstenite. The handshake validates
//! the request path, and the codec enforces the read limit so oversized
//! frames are refused before they are buffered whole.

use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::error::{CapacityError, ProtocolError};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message, WebSocketConfig};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use super::{
    Acceptor, CloseReason, Connection, ConnectionError, InboundMessage, MessageKind,
    PendingConnection,
};

/// WebSocket listener settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Request path clients must connect to
    pub path: String,
    /// Largest accepted message in bytes
    pub max_message_size: usize,
    /// TCP nodelay
    pub tcp_nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            max_message_size: 512,
            tcp_nodelay: true,
        }
    }
}

/// Accepts WebSocket connections on a TCP listener
pub struct WsAcceptor {
    listener: TcpListener,
    config: TransportConfig,
}

impl WsAcceptor {
    /// Bind the listener. Failure here is fatal to the bridge.
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Acceptor for WsAcceptor {
    type Connection = WsConnection;

    async fn accept(&self) -> io::Result<(SocketAddr, PendingConnection<WsConnection>)> {
        let (stream, addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(self.config.tcp_nodelay) {
            debug!("Failed to set nodelay for {}: {}", addr, e);
        }

        let config = self.config.clone();
        let pending: PendingConnection<WsConnection> =
            Box::pin(async move { WsConnection::handshake(stream, addr, &config).await });
        Ok((addr, pending))
    }
}

/// One accepted WebSocket client
pub struct WsConnection {
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
}

impl WsConnection {
    /// Perform the server handshake, rejecting requests for any other path
    pub async fn handshake(
        stream: TcpStream,
        peer: SocketAddr,
        config: &TransportConfig,
    ) -> Result<Self, ConnectionError> {
        let expected_path = config.path.clone();

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_size);
        ws_config.max_frame_size = Some(config.max_message_size);

        let callback = move |req: &Request, response: Response| {
            let request_path = req.uri().path();
            if request_path != expected_path {
                let mut error = ErrorResponse::new(Some(format!(
                    "Invalid path: expected '{}', got '{}'",
                    expected_path, request_path
                )));
                *error.status_mut() = StatusCode::NOT_FOUND;
                return Err(error);
            }
            Ok(response)
        };

        let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config))
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        Ok(Self { ws, peer })
    }
}

fn map_read_error(err: WsError) -> ConnectionError {
    match err {
        WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
            ConnectionError::OversizedMessage {
                size,
                limit: max_size,
            }
        }
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            ConnectionError::Closed
        }
        other => ConnectionError::ReadFailed(other.to_string()),
    }
}

fn close_code(reason: CloseReason) -> CloseCode {
    match reason {
        CloseReason::Normal => CloseCode::Normal,
        CloseReason::Shutdown => CloseCode::Away,
        CloseReason::TooLarge => CloseCode::Size,
        CloseReason::Idle => CloseCode::Policy,
        CloseReason::Overloaded => CloseCode::Again,
        CloseReason::Error => CloseCode::Error,
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn recv(&mut self) -> Result<InboundMessage, ConnectionError> {
        loop {
            let message = match self.ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(map_read_error(e)),
                None => return Err(ConnectionError::Closed),
            };

            // Pong replies to client pings are queued by tungstenite itself
            return Ok(match message {
                Message::Text(text) => InboundMessage::text(Bytes::from(text.into_bytes())),
                Message::Binary(data) => InboundMessage::binary(Bytes::from(data)),
                Message::Ping(_) => InboundMessage::control(MessageKind::Ping),
                Message::Pong(_) => InboundMessage::control(MessageKind::Pong),
                Message::Close(_) => InboundMessage::control(MessageKind::Close),
                // Raw frames are never produced while reading
                Message::Frame(_) => continue,
            });
        }
    }

    async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.ws
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(map_read_error)
    }

    async fn close(&mut self, reason: CloseReason) {
        let frame = CloseFrame {
            code: close_code(reason),
            reason: Cow::Owned(reason.to_string()),
        };
        if let Err(e) = self.ws.close(Some(frame)).await {
            debug!("Close handshake with {} failed: {}", self.peer, e);
        }
    }
}
