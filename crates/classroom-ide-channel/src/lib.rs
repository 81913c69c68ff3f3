//! Command channel for the classroom IDE.
//!
//! Provides:
//! - Wire protocol (JSON command and response frames)
//! - Correlated subscriptions with invocation limits
//! - Authentication handshake on connect
//! - Reconnecting WebSocket transport (feature: websocket)

pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod subscription;
pub mod transport;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use channel::{Channel, MAX_CORRELATION_ID, MessageHandler};
pub use config::{ChannelConfig, ChannelOptions, Location, LocationOverride, ReconnectPolicy};
pub use error::{ChannelError, SendError, TransportError};
pub use protocol::{CHANNEL_CLOSED_CODE, CommandMessage, CorrelationId, Handshake, InboundMessage};
pub use registry::{ChannelRegistry, DEFAULT_CHANNEL};
pub use subscription::{InvocationLimit, ResponseCallback, Subscription};
pub use transport::{Connector, EventReceiver, Transport, TransportEvent};
#[cfg(feature = "websocket")]
pub use websocket::{WsConnector, WsTransport};
