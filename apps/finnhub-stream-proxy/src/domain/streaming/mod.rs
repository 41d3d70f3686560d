//! Market Data Streaming Types
//!
//! Core domain types for the upstream trade feed: the commands sent to
//! Finnhub, the classified messages received from it, and the shared
//! connection state observed by the health endpoint and by new clients.
//!
//! These types are codec-agnostic. Wire decoding lives in
//! `infrastructure::finnhub::codec`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::subscription::Symbol;

// =============================================================================
// Upstream Commands
// =============================================================================

/// Direction of an upstream subscription command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    /// Start receiving trades for a symbol.
    Subscribe,
    /// Stop receiving trades for a symbol.
    Unsubscribe,
}

/// A subscription change sent to the upstream feed.
///
/// Serializes to the Finnhub frame `{"type":"subscribe","symbol":"AAPL"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UpstreamCommand {
    /// Subscribe or unsubscribe.
    #[serde(rename = "type")]
    pub action: CommandAction,
    /// Normalized symbol.
    pub symbol: Symbol,
}

impl UpstreamCommand {
    /// Build a subscribe command.
    #[must_use]
    pub const fn subscribe(symbol: Symbol) -> Self {
        Self {
            action: CommandAction::Subscribe,
            symbol,
        }
    }

    /// Build an unsubscribe command.
    #[must_use]
    pub const fn unsubscribe(symbol: Symbol) -> Self {
        Self {
            action: CommandAction::Unsubscribe,
            symbol,
        }
    }
}

// =============================================================================
// Upstream Messages
// =============================================================================

/// A single trade entry from an upstream trade batch.
///
/// Only the symbol is interpreted; the rest of the entry is relayed
/// to clients untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEntry {
    /// Symbol the trade belongs to.
    pub symbol: Symbol,
    /// The full upstream entry, including the `s` field.
    pub data: serde_json::Value,
}

/// A classified message received from the upstream feed.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamMessage {
    /// A batch of trades (`{"type":"trade","data":[...]}`).
    Trades(Vec<TradeEntry>),
    /// Keepalive from the provider.
    Ping,
    /// Provider-reported error (`{"type":"error","msg":...}`).
    Error(String),
    /// Any other JSON object, kept as-is.
    Other(serde_json::Value),
    /// A frame that could not be parsed as a JSON object.
    Unclassified(String),
}

impl UpstreamMessage {
    /// Short label used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Trades(_) => "trade",
            Self::Ping => "ping",
            Self::Error(_) => "error",
            Self::Other(_) => "other",
            Self::Unclassified(_) => "unclassified",
        }
    }
}

// =============================================================================
// Feed State
// =============================================================================

/// Connection state of the upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No live connection and no attempt in progress.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected; subscriptions have been replayed.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Point-in-time copy of [`FeedState`].
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    /// Current connection state.
    pub state: ConnectionState,
    /// When the link last became connected.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error reported by the link or the provider.
    pub last_error: Option<String>,
    /// Consecutive failed attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Upstream messages received since startup.
    pub messages_received: u64,
}

/// Shared state of the upstream feed.
///
/// Written by the upstream link and the fan-out router, read by client
/// sessions (initial status) and the health server.
#[derive(Debug)]
pub struct FeedState {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// Create a state in [`ConnectionState::Disconnected`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            last_connected_at: parking_lot::RwLock::new(None),
            last_error: parking_lot::RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// Set the connection state.
    ///
    /// Entering `Connected` stamps the connect time and clears the
    /// attempt counter and last error.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Record the most recent error.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Record the attempt number of the pending reconnect.
    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    /// Increment the received message counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the link is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Copy of every field.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).unwrap()
    }

    #[test]
    fn command_serializes_to_finnhub_frame() {
        let json = serde_json::to_string(&UpstreamCommand::subscribe(symbol("aapl"))).unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"AAPL"}"#);

        let json = serde_json::to_string(&UpstreamCommand::unsubscribe(symbol("MSFT"))).unwrap();
        assert_eq!(json, r#"{"type":"unsubscribe","symbol":"MSFT"}"#);
    }

    #[test]
    fn feed_state_starts_disconnected() {
        let state = FeedState::new();
        assert_eq!(state.state(), ConnectionState::Disconnected);
        assert!(!state.is_connected());
        assert!(state.snapshot().last_connected_at.is_none());
    }

    #[test]
    fn connecting_clears_error_and_attempts() {
        let state = FeedState::new();
        state.set_error("boom");
        state.set_reconnect_attempts(3);
        state.set_state(ConnectionState::Reconnecting);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.last_error.as_deref(), Some("boom"));
        assert_eq!(snapshot.reconnect_attempts, 3);

        state.set_state(ConnectionState::Connected);

        let snapshot = state.snapshot();
        assert!(state.is_connected());
        assert!(snapshot.last_error.is_none());
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert!(snapshot.last_connected_at.is_some());
    }

    #[test]
    fn message_counter_increments() {
        let state = FeedState::new();
        state.increment_messages();
        state.increment_messages();
        assert_eq!(state.snapshot().messages_received, 2);
    }

    #[test]
    fn message_kind_labels() {
        assert_eq!(UpstreamMessage::Ping.kind(), "ping");
        assert_eq!(UpstreamMessage::Trades(vec![]).kind(), "trade");
        assert_eq!(UpstreamMessage::Unclassified("x".into()).kind(), "unclassified");
    }
}
