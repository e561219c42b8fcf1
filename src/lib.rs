//! Kawka - WebSocket to Kafka bridge
//!
//! Clients hold a persistent WebSocket connection and send JSON envelopes;
//! each message is transformed into a record and published to the Kafka
//! topic it names, either waiting for the broker acknowledgment or through a
//! bounded queue.

pub mod bridge;
pub mod config;
pub mod metrics;
pub mod publisher;
pub mod record;
pub mod registry;
pub mod session;
pub mod transform;
pub mod transport;

pub use bridge::{Bridge, BridgeBuilder, BridgeConfig, BridgeError};
pub use config::Config;
pub use metrics::{Metrics, MetricsServer};
#[cfg(feature = "kafka")]
pub use publisher::KafkaClient;
pub use publisher::{Ack, BrokerClient, MemoryBroker, PublishError, PublishMode, Publisher};
pub use record::Record;
pub use registry::{Registry, SessionHandle, SessionId};
pub use session::{Session, SessionConfig, SessionSummary};
pub use transform::{EnvelopeTransform, PayloadMode, Transform, TransformError};
pub use transport::{
    Acceptor, CloseReason, Connection, ConnectionError, TransportConfig, WsAcceptor,
};
