//! Downstream Client Protocol
//!
//! Commands clients send over their WebSocket and the events the proxy
//! sends back. All frames are JSON text.
//!
//! | Client sends | Proxy replies |
//! |---|---|
//! | `{"cmd":"subscribe","symbol":"AAPL"}` | `{"type":"subscribed","symbol":"AAPL"}` |
//! | `{"cmd":"unsubscribe","symbol":"AAPL"}` | `{"type":"unsubscribed","symbol":"AAPL"}` |
//! | `{"cmd":"ping"}` | `{"type":"pong"}` |
//! | anything else | `{"type":"error","message":...}` |

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::subscription::Symbol;

// =============================================================================
// Errors
// =============================================================================

/// A client frame that could not be turned into a command.
///
/// The `Display` text is sent back to the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientProtocolError {
    /// Not valid JSON, or not a JSON object.
    #[error("invalid json")]
    InvalidJson,

    /// `cmd` missing or not one of the known commands.
    #[error("unknown command")]
    UnknownCommand,

    /// Subscribe or unsubscribe without a usable symbol.
    #[error("missing symbol")]
    MissingSymbol,

    /// A non-text frame.
    #[error("expected text frame")]
    NotText,
}

// =============================================================================
// Commands
// =============================================================================

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Start receiving trades for a symbol.
    Subscribe(Symbol),
    /// Stop receiving trades for a symbol.
    Unsubscribe(Symbol),
    /// Liveness probe.
    Ping,
}

impl ClientCommand {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientProtocolError`] describing why the frame was
    /// rejected.
    pub fn parse(text: &str) -> Result<Self, ClientProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|_| ClientProtocolError::InvalidJson)?;
        let Value::Object(fields) = value else {
            return Err(ClientProtocolError::InvalidJson);
        };

        let symbol = || {
            fields
                .get("symbol")
                .and_then(Value::as_str)
                .and_then(Symbol::parse)
                .ok_or(ClientProtocolError::MissingSymbol)
        };

        match fields.get("cmd").and_then(Value::as_str) {
            Some("subscribe") => Ok(Self::Subscribe(symbol()?)),
            Some("unsubscribe") => Ok(Self::Unsubscribe(symbol()?)),
            Some("ping") => Ok(Self::Ping),
            _ => Err(ClientProtocolError::UnknownCommand),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// An event sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Upstream link status; sent on connect and on every transition.
    Status {
        /// Whether the upstream link is connected.
        connected: bool,
    },
    /// Acknowledges a subscribe.
    Subscribed {
        /// The normalized symbol.
        symbol: Symbol,
    },
    /// Acknowledges an unsubscribe.
    Unsubscribed {
        /// The normalized symbol.
        symbol: Symbol,
    },
    /// One trade entry, relayed unchanged.
    Trade {
        /// Symbol the trade belongs to.
        symbol: Symbol,
        /// The upstream trade entry.
        data: Value,
    },
    /// Reply to a client ping.
    Pong,
    /// Rejected command.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ClientEvent {
    /// Serialize once for delivery to any number of clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn encode(&self) -> Result<EncodedEvent, serde_json::Error> {
        serde_json::to_string(self).map(|json| EncodedEvent(Arc::from(json)))
    }
}

impl From<&ClientProtocolError> for ClientEvent {
    fn from(error: &ClientProtocolError) -> Self {
        Self::Error {
            message: error.to_string(),
        }
    }
}

/// A serialized [`ClientEvent`], cheap to clone across clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEvent(Arc<str>);

impl EncodedEvent {
    /// The JSON text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting commands.
    Connected,
    /// Applying a subscribe or unsubscribe to the registry.
    Updating,
    /// Closed; interest has been released.
    Disconnected,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sym(raw: &str) -> Symbol {
        Symbol::parse(raw).unwrap()
    }

    #[test_case(r#"{"cmd":"subscribe","symbol":"aapl"}"#, ClientCommand::Subscribe(sym("AAPL")) ; "subscribe normalizes")]
    #[test_case(r#"{"cmd":"unsubscribe","symbol":"MSFT"}"#, ClientCommand::Unsubscribe(sym("MSFT")) ; "unsubscribe")]
    #[test_case(r#"{"cmd":"ping"}"#, ClientCommand::Ping ; "ping")]
    #[test_case(r#"{"cmd":"ping","symbol":"AAPL","extra":1}"#, ClientCommand::Ping ; "extra fields ignored")]
    fn parses_valid_commands(text: &str, expected: ClientCommand) {
        assert_eq!(ClientCommand::parse(text).unwrap(), expected);
    }

    #[test_case("not json", ClientProtocolError::InvalidJson ; "garbage")]
    #[test_case(r#"["subscribe","AAPL"]"#, ClientProtocolError::InvalidJson ; "array")]
    #[test_case(r#""ping""#, ClientProtocolError::InvalidJson ; "bare string")]
    #[test_case(r#"{"cmd":"foo"}"#, ClientProtocolError::UnknownCommand ; "unknown cmd")]
    #[test_case(r#"{"symbol":"AAPL"}"#, ClientProtocolError::UnknownCommand ; "missing cmd")]
    #[test_case(r#"{"cmd":"subscribe"}"#, ClientProtocolError::MissingSymbol ; "missing symbol")]
    #[test_case(r#"{"cmd":"subscribe","symbol":""}"#, ClientProtocolError::MissingSymbol ; "empty symbol")]
    #[test_case(r#"{"cmd":"unsubscribe","symbol":42}"#, ClientProtocolError::MissingSymbol ; "numeric symbol")]
    fn rejects_invalid_commands(text: &str, expected: ClientProtocolError) {
        assert_eq!(ClientCommand::parse(text).unwrap_err(), expected);
    }

    #[test]
    fn error_messages_match_wire_text() {
        assert_eq!(ClientProtocolError::InvalidJson.to_string(), "invalid json");
        assert_eq!(ClientProtocolError::UnknownCommand.to_string(), "unknown command");
        assert_eq!(ClientProtocolError::MissingSymbol.to_string(), "missing symbol");
    }

    #[test]
    fn events_encode_with_type_tag() {
        let cases = [
            (ClientEvent::Status { connected: true }, r#"{"type":"status","connected":true}"#),
            (ClientEvent::Subscribed { symbol: sym("AAPL") }, r#"{"type":"subscribed","symbol":"AAPL"}"#),
            (ClientEvent::Unsubscribed { symbol: sym("AAPL") }, r#"{"type":"unsubscribed","symbol":"AAPL"}"#),
            (ClientEvent::Pong, r#"{"type":"pong"}"#),
            (ClientEvent::from(&ClientProtocolError::UnknownCommand), r#"{"type":"error","message":"unknown command"}"#),
        ];

        for (event, expected) in cases {
            assert_eq!(event.encode().unwrap().as_str(), expected);
        }
    }

    #[test]
    fn trade_event_carries_entry_unchanged() {
        let data = serde_json::json!({"s": "AAPL", "p": 187.5, "v": 100, "t": 1_700_000_000_000_u64});
        let event = ClientEvent::Trade { symbol: sym("AAPL"), data: data.clone() };

        let decoded: Value = serde_json::from_str(event.encode().unwrap().as_str()).unwrap();

        assert_eq!(decoded["type"], "trade");
        assert_eq!(decoded["symbol"], "AAPL");
        assert_eq!(decoded["data"], data);
    }
}
