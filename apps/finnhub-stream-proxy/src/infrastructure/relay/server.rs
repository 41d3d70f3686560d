//! Downstream WebSocket Server
//!
//! Accepts client connections on `GET /ws`. Each connection gets a
//! directory entry, a writer task draining its outbound queue, and a
//! [`ClientSession`] driven by the frames it sends.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    ClientDirectory, ClientRegistration, ClientSession, SessionClosed, SubscriptionService,
};
use crate::domain::session::EncodedEvent;
use crate::domain::streaming::FeedState;

/// Shared state for the relay server.
#[derive(Debug, Clone)]
pub struct RelayState {
    /// Interest registry front end.
    pub subscriptions: SubscriptionService,
    /// Connected clients.
    pub directory: Arc<ClientDirectory>,
    /// Upstream link status, reported to new clients.
    pub feed: Arc<FeedState>,
    /// Cancelled on process shutdown.
    pub shutdown: CancellationToken,
}

/// Build the relay router.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws", get(upgrade_handler))
        .with_state(state)
}

/// Downstream WebSocket server.
#[derive(Debug)]
pub struct RelayServer {
    port: u16,
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Create a server for `port`.
    #[must_use]
    pub const fn new(port: u16, state: Arc<RelayState>) -> Self {
        Self { port, state }
    }

    /// Bind and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError` if binding fails or the server stops
    /// with an I/O error.
    pub async fn run(self) -> Result<(), RelayServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayServerError::BindFailed(self.port, e))?;
        serve(listener, self.state).await
    }
}

/// Serve on an already-bound listener until shutdown.
///
/// # Errors
///
/// Returns `RelayServerError::ServerFailed` on a fatal I/O error.
pub async fn serve(listener: TcpListener, state: Arc<RelayState>) -> Result<(), RelayServerError> {
    let shutdown = state.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Relay server listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Relay server stopped");
    Ok(())
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let ClientRegistration {
        id,
        sender,
        receiver,
        close,
    } = state.directory.register();

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_events(ws_tx, receiver, close.clone()));

    let mut session = ClientSession::new(id, state.subscriptions.clone(), sender, state.feed.clone());

    if session.open().await.is_ok() {
        loop {
            let frame = tokio::select! {
                () = close.cancelled() => break,
                () = state.shutdown.cancelled() => break,
                frame = ws_rx.next() => frame,
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    tracing::debug!(client_id = %id, error = %e, "Client socket error");
                    break;
                }
                None => break,
            };

            let handled = tokio::select! {
                () = close.cancelled() => break,
                handled = dispatch(&mut session, message) => handled,
            };
            if handled.is_err() {
                break;
            }
        }
    }

    state.directory.unregister(id);
    session.close().await;
    if let Err(e) = writer.await {
        tracing::warn!(client_id = %id, error = %e, "Client writer task failed");
    }
}

/// A close frame ends the session like a dropped socket.
async fn dispatch(session: &mut ClientSession, message: Message) -> Result<(), SessionClosed> {
    match message {
        Message::Text(text) => session.handle_text(text.as_str()).await,
        Message::Binary(_) => session.handle_non_text().await,
        // axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => Ok(()),
        Message::Close(_) => Err(SessionClosed),
    }
}

async fn write_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<EncodedEvent>,
    close: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = close.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        if let Err(e) = sink.send(Message::Text(event.as_str().into())).await {
            tracing::debug!(error = %e, "Client write failed");
            break;
        }
    }

    close.cancel();
    let _ = sink.close().await;
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, #[source] std::io::Error),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(#[from] std::io::Error),
}
