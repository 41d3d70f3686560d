//! Finnhub Frame Codec
//!
//! Classifies inbound text frames and encodes outbound subscription
//! commands.
//!
//! Inbound frames look like:
//!
//! ```json
//! {"type":"trade","data":[{"s":"AAPL","p":187.5,"t":1700000000000,"v":100}]}
//! {"type":"ping"}
//! {"type":"error","msg":"Invalid symbol"}
//! ```
//!
//! Decoding never fails: anything that is not a JSON object becomes
//! [`UpstreamMessage::Unclassified`], and trade entries without a usable
//! `s` field are skipped.

use serde_json::Value;

use crate::domain::streaming::{TradeEntry, UpstreamCommand, UpstreamMessage};
use crate::domain::subscription::Symbol;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON codec for the Finnhub trade stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct FinnhubCodec;

impl FinnhubCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify a text frame.
    #[must_use]
    pub fn decode(&self, text: &str) -> UpstreamMessage {
        let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(text) else {
            return UpstreamMessage::Unclassified(text.to_owned());
        };

        match fields.get("type").and_then(Value::as_str) {
            Some("trade") => {
                let entries = match fields.remove("data") {
                    Some(Value::Array(entries)) => entries,
                    _ => Vec::new(),
                };
                UpstreamMessage::Trades(entries.into_iter().filter_map(Self::trade_entry).collect())
            }
            Some("ping") => UpstreamMessage::Ping,
            Some("error") => {
                let msg = fields
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown upstream error")
                    .to_owned();
                UpstreamMessage::Error(msg)
            }
            _ => UpstreamMessage::Other(Value::Object(fields)),
        }
    }

    /// Decode a binary frame; Finnhub only sends text, so this is lossy.
    #[must_use]
    pub fn decode_binary(&self, data: &[u8]) -> UpstreamMessage {
        self.decode(&String::from_utf8_lossy(data))
    }

    /// Encode a subscription command as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, command: &UpstreamCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(command)?)
    }

    fn trade_entry(entry: Value) -> Option<TradeEntry> {
        let symbol = entry.get("s").and_then(Value::as_str).and_then(Symbol::parse)?;
        Some(TradeEntry {
            symbol,
            data: entry,
        })
    }
}
