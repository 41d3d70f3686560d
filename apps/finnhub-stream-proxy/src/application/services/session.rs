//! Client Session
//!
//! Per-connection command handling. The transport feeds frames in and
//! drains the outbound queue; the session turns commands into registry
//! changes and replies.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::subscription::SubscriptionService;
use crate::domain::session::{
    ClientCommand, ClientEvent, ClientProtocolError, EncodedEvent, SessionState,
};
use crate::domain::streaming::FeedState;
use crate::domain::subscription::ClientId;
use crate::infrastructure::metrics;

/// The client's outbound queue is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client session closed")]
pub struct SessionClosed;

/// One downstream client.
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    subscriptions: SubscriptionService,
    outbound: mpsc::Sender<EncodedEvent>,
    feed: Arc<FeedState>,
    state: SessionState,
}

impl ClientSession {
    /// Create a session that replies through `outbound`.
    #[must_use]
    pub const fn new(
        id: ClientId,
        subscriptions: SubscriptionService,
        outbound: mpsc::Sender<EncodedEvent>,
        feed: Arc<FeedState>,
    ) -> Self {
        Self {
            id,
            subscriptions,
            outbound,
            feed,
            state: SessionState::Connected,
        }
    }

    /// The client's identity.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Greet the client with the upstream link status.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the outbound queue is gone.
    pub async fn open(&mut self) -> Result<(), SessionClosed> {
        let connected = self.feed.is_connected();
        self.reply(ClientEvent::Status { connected }).await
    }

    /// Handle one text frame.
    ///
    /// Malformed frames are answered with an error event; the session
    /// stays open.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the outbound queue is gone.
    pub async fn handle_text(&mut self, text: &str) -> Result<(), SessionClosed> {
        let command = match ClientCommand::parse(text) {
            Ok(command) => command,
            Err(e) => return self.reject(&e).await,
        };

        match command {
            ClientCommand::Subscribe(symbol) => {
                metrics::record_client_command("subscribe");
                self.state = SessionState::Updating;
                self.subscriptions.add_interest(self.id, &symbol).await;
                self.state = SessionState::Connected;
                self.reply(ClientEvent::Subscribed { symbol }).await
            }
            ClientCommand::Unsubscribe(symbol) => {
                metrics::record_client_command("unsubscribe");
                self.state = SessionState::Updating;
                self.subscriptions.remove_interest(self.id, &symbol).await;
                self.state = SessionState::Connected;
                self.reply(ClientEvent::Unsubscribed { symbol }).await
            }
            ClientCommand::Ping => {
                metrics::record_client_command("ping");
                self.reply(ClientEvent::Pong).await
            }
        }
    }

    /// Handle a binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the outbound queue is gone.
    pub async fn handle_non_text(&mut self) -> Result<(), SessionClosed> {
        self.reject(&ClientProtocolError::NotText).await
    }

    /// Release every interest this client holds.
    ///
    /// Returns how many symbols lost their last client.
    pub async fn close(mut self) -> usize {
        self.state = SessionState::Disconnected;
        let deactivated = self.subscriptions.remove_client(self.id).await;
        tracing::debug!(client_id = %self.id, deactivated, "Client session closed");
        deactivated
    }

    async fn reject(&self, error: &ClientProtocolError) -> Result<(), SessionClosed> {
        metrics::record_client_command("invalid");
        tracing::debug!(client_id = %self.id, error = %error, "Rejected client frame");
        self.reply(ClientEvent::from(error)).await
    }

    async fn reply(&self, event: ClientEvent) -> Result<(), SessionClosed> {
        let encoded = match event.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(client_id = %self.id, error = %e, "Failed to encode reply");
                return Ok(());
            }
        };
        self.outbound.send(encoded).await.map_err(|_| SessionClosed)
    }
}
