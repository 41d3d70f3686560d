//! Finnhub Upstream Adapters
//!
//! Everything that talks to the Finnhub trade stream:
//!
//! - **codec**: frame classification and command encoding
//! - **connector**: `tokio-tungstenite` transport
//! - **link**: the reconnecting, replaying connection loop
//! - **heartbeat** / **reconnect**: liveness and backoff policies

pub mod codec;
pub mod connector;
pub mod heartbeat;
pub mod link;
pub mod reconnect;

pub use codec::{CodecError, FinnhubCodec};
pub use connector::WebSocketConnector;
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
pub use link::{LinkError, LinkEvent, UpstreamLink, UpstreamLinkConfig};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
