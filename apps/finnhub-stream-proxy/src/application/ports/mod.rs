//! Port Interfaces
//!
//! Contracts between the relay core and the outside world, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`UpstreamConnector`]: opens a framed connection to the provider
//!
//! ## Driver Ports (Inbound)
//!
//! - [`ReplaySource`]: symbols to resubscribe after a reconnect
//! - [`InboundSource`]: classified upstream messages for fan-out

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::domain::streaming::UpstreamMessage;
use crate::domain::subscription::{SubscriptionRegistry, Symbol};

// =============================================================================
// Transport
// =============================================================================

/// A WebSocket frame, independent of the client library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 text payload.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// Ping control frame.
    Ping(Vec<u8>),
    /// Pong control frame.
    Pong(Vec<u8>),
    /// Close frame.
    Close,
}

/// Errors raised by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection attempt did not finish in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Reading or writing a frame failed.
    #[error("transport error: {0}")]
    Io(String),
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<WireFrame, Error = TransportError> + Send>>;

/// Inbound half of a connection. Ends when the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireFrame, TransportError>> + Send>>;

/// An open connection split into halves.
pub struct UpstreamTransport {
    /// Frames to the provider.
    pub sink: FrameSink,
    /// Frames from the provider.
    pub stream: FrameStream,
}

impl std::fmt::Debug for UpstreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamTransport").finish_non_exhaustive()
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Opens connections to the upstream provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Establish a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached.
    async fn connect(&self) -> Result<UpstreamTransport, TransportError>;
}

/// Source of the symbols that must be subscribed upstream.
pub trait ReplaySource: Send + Sync {
    /// Snapshot of active symbols.
    fn active_symbols(&self) -> Vec<Symbol>;
}

impl ReplaySource for SubscriptionRegistry {
    fn active_symbols(&self) -> Vec<Symbol> {
        Self::active_symbols(self)
    }
}

/// Source of classified upstream messages.
#[async_trait]
pub trait InboundSource: Send + Sync {
    /// Wait for the next message. `None` once the source is gone.
    async fn next_message(&self) -> Option<UpstreamMessage>;
}
