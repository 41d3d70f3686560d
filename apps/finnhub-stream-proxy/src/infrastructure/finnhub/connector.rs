//! WebSocket Connector
//!
//! [`UpstreamConnector`] backed by `tokio-tungstenite`. The API token is
//! passed as a `token` query parameter, which is how Finnhub
//! authenticates stream connections.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{TransportError, UpstreamConnector, UpstreamTransport, WireFrame};

/// Default bound on the TCP + TLS + WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to the Finnhub stream over WebSocket.
#[derive(Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("url", &redact_token(&self.url))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl WebSocketConnector {
    /// Connector for `base_url`, authenticating with `api_key`.
    #[must_use]
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            url: authenticated_url(base_url, api_key),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Connector for a URL used as-is (no token appended).
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl UpstreamConnector for WebSocketConnector {
    async fn connect(&self) -> Result<UpstreamTransport, TransportError> {
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(&self.url))
                .await
                .map_err(|_| TransportError::ConnectTimeout)?
                .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|frame: WireFrame| future::ready(Ok::<_, TransportError>(to_message(frame))));

        let stream = read.filter_map(|result| {
            future::ready(match result {
                Ok(message) => from_message(message).map(Ok),
                Err(e) => Some(Err(TransportError::Io(e.to_string()))),
            })
        });

        Ok(UpstreamTransport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Binary(data) => Message::Binary(data.into()),
        WireFrame::Ping(data) => Message::Ping(data.into()),
        WireFrame::Pong(data) => Message::Pong(data.into()),
        WireFrame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Option<WireFrame> {
    match message {
        Message::Text(text) => Some(WireFrame::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(WireFrame::Binary(data.to_vec())),
        Message::Ping(data) => Some(WireFrame::Ping(data.to_vec())),
        Message::Pong(data) => Some(WireFrame::Pong(data.to_vec())),
        Message::Close(_) => Some(WireFrame::Close),
        Message::Frame(_) => None,
    }
}

/// Append the API token as a query parameter.
#[must_use]
pub fn authenticated_url(base_url: &str, api_key: &str) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}token={api_key}")
}

/// Replace the token value for logging.
#[must_use]
pub fn redact_token(url: &str) -> String {
    url.find("token=").map_or_else(
        || url.to_owned(),
        |start| {
            let value_start = start + "token=".len();
            let value_end = url[value_start..]
                .find('&')
                .map_or(url.len(), |offset| value_start + offset);
            format!("{}[REDACTED]{}", &url[..value_start], &url[value_end..])
        },
    )
}
