//! Upstream Link
//!
//! Owns the single connection to the Finnhub trade stream.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (failure) -> Reconnecting -> Connecting ...
//! ```
//!
//! On every successful connect the link first writes a subscribe frame
//! for each symbol the [`ReplaySource`] reports as active, then pumps
//! frames in both directions until the connection fails, the peer closes
//! it, or the heartbeat times out. Every session end is followed by a
//! backoff delay. The link never gives up.
//!
//! Commands submitted while disconnected wait in the bounded command
//! queue and are written after the next replay.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, FinnhubCodec};
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    InboundSource, ReplaySource, TransportError, UpstreamConnector, UpstreamTransport, WireFrame,
};
use crate::domain::streaming::{ConnectionState, FeedState, UpstreamCommand, UpstreamMessage};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Upstream link configuration.
#[derive(Debug, Clone)]
pub struct UpstreamLinkConfig {
    /// Backoff between connection attempts.
    pub reconnect: ReconnectConfig,
    /// Dead-connection detection.
    pub heartbeat: HeartbeatConfig,
    /// Capacity of the outbound command queue.
    pub command_capacity: usize,
    /// Capacity of the inbound message queue.
    pub inbound_capacity: usize,
}

impl Default for UpstreamLinkConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            command_capacity: 1024,
            inbound_capacity: 4096,
        }
    }
}

// =============================================================================
// Events and Errors
// =============================================================================

/// Connection lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connection attempt started.
    Connecting,
    /// Connected; `replayed` subscriptions were written.
    Connected {
        /// Number of replayed subscriptions.
        replayed: usize,
    },
    /// The connection ended or could not be established.
    Disconnected {
        /// Why.
        reason: String,
    },
    /// Waiting before the next attempt.
    Reconnecting {
        /// Consecutive failures so far.
        attempt: u32,
        /// Backoff delay.
        delay: Duration,
    },
}

/// Upstream link errors.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A command could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// No frame arrived after a heartbeat ping.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The link task has stopped.
    #[error("upstream link stopped")]
    Stopped,
}

// =============================================================================
// Upstream Link
// =============================================================================

/// The single shared connection to the upstream feed.
pub struct UpstreamLink {
    config: UpstreamLinkConfig,
    codec: FinnhubCodec,
    connector: Arc<dyn UpstreamConnector>,
    replay: Arc<dyn ReplaySource>,
    feed: Arc<FeedState>,
    command_tx: mpsc::Sender<UpstreamCommand>,
    command_rx: parking_lot::Mutex<Option<mpsc::Receiver<UpstreamCommand>>>,
    inbound_tx: mpsc::Sender<UpstreamMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<UpstreamMessage>>,
    event_tx: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UpstreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLink")
            .field("config", &self.config)
            .field("state", &self.feed.state())
            .finish_non_exhaustive()
    }
}

impl UpstreamLink {
    /// Create a link. Nothing connects until [`start`](Self::start).
    #[must_use]
    pub fn new(
        config: UpstreamLinkConfig,
        connector: Arc<dyn UpstreamConnector>,
        replay: Arc<dyn ReplaySource>,
        feed: Arc<FeedState>,
        event_tx: mpsc::Sender<LinkEvent>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));

        Arc::new(Self {
            config,
            codec: FinnhubCodec::new(),
            connector,
            replay,
            feed,
            command_tx,
            command_rx: parking_lot::Mutex::new(Some(command_rx)),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            event_tx,
            cancel,
        })
    }

    /// Spawn the connection loop.
    ///
    /// Only the first call spawns; later calls return `None`.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let Some(commands) = self.command_rx.lock().take() else {
            tracing::debug!("Upstream link already started");
            return None;
        };

        let link = Arc::clone(self);
        Some(tokio::spawn(async move { link.run(commands).await }))
    }

    /// Queue a command for the upstream connection.
    ///
    /// Waits only while the command queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Stopped`] once the link task has exited.
    pub async fn send_command(&self, command: UpstreamCommand) -> Result<(), LinkError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| LinkError::Stopped)
    }

    /// A sender into the command queue.
    #[must_use]
    pub fn command_sender(&self) -> mpsc::Sender<UpstreamCommand> {
        self.command_tx.clone()
    }

    /// Wait for the next inbound message.
    pub async fn next_message(&self) -> Option<UpstreamMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Whether the link is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.feed.is_connected()
    }

    /// Shared feed state.
    #[must_use]
    pub fn feed_state(&self) -> Arc<FeedState> {
        Arc::clone(&self.feed)
    }

    async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<UpstreamCommand>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            self.emit(LinkEvent::Connecting);

            let result = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = self.connect_and_run(&mut commands, &mut policy) => result,
            };

            let reason = match result {
                Ok(()) => {
                    tracing::info!("Upstream connection closed");
                    "connection closed".to_owned()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream connection error");
                    self.feed.set_error(e.to_string());
                    e.to_string()
                }
            };

            self.set_state(ConnectionState::Disconnected);
            self.emit(LinkEvent::Disconnected { reason });

            let delay = policy.next_delay();
            let attempt = policy.attempt_count();
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to upstream"
            );

            self.feed.set_reconnect_attempts(attempt);
            self.set_state(ConnectionState::Reconnecting);
            self.emit(LinkEvent::Reconnecting { attempt, delay });
            metrics::record_reconnect();

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Upstream link cancelled during reconnect delay");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Upstream link stopped");
    }

    async fn connect_and_run(
        &self,
        commands: &mut mpsc::Receiver<UpstreamCommand>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), LinkError> {
        tracing::info!("Connecting to upstream");

        let UpstreamTransport {
            mut sink,
            mut stream,
        } = self.connector.connect().await?;
        policy.reset();

        let symbols = self.replay.active_symbols();
        for symbol in &symbols {
            let frame = self.codec.encode(&UpstreamCommand::subscribe(symbol.clone()))?;
            sink.send(WireFrame::Text(frame)).await?;
        }

        self.set_state(ConnectionState::Connected);
        self.emit(LinkEvent::Connected {
            replayed: symbols.len(),
        });
        tracing::info!(replayed = symbols.len(), "Connected to upstream");

        let mut heartbeat = HeartbeatMonitor::new(self.config.heartbeat.clone(), Instant::now());
        let period = self.config.heartbeat.tick_period();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = stream.next() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    heartbeat.record_activity(Instant::now());

                    match frame? {
                        WireFrame::Text(text) => self.deliver(self.codec.decode(&text)).await?,
                        WireFrame::Binary(data) => {
                            self.deliver(self.codec.decode_binary(&data)).await?;
                        }
                        // tungstenite queues the pong reply itself.
                        WireFrame::Ping(_) => tracing::trace!("Received ping"),
                        WireFrame::Pong(_) => tracing::trace!("Received pong"),
                        WireFrame::Close => {
                            tracing::info!("Upstream sent close frame");
                            return Ok(());
                        }
                    }
                }

                command = commands.recv() => {
                    let Some(command) = command else {
                        return Ok(());
                    };
                    let frame = self.codec.encode(&command)?;
                    sink.send(WireFrame::Text(frame)).await?;
                    metrics::record_upstream_command(command.action);
                    tracing::debug!(
                        action = ?command.action,
                        symbol = %command.symbol,
                        "Sent upstream command"
                    );
                }

                _ = ticker.tick() => match heartbeat.on_tick(Instant::now()) {
                    HeartbeatAction::SendPing => sink.send(WireFrame::Ping(Vec::new())).await?,
                    HeartbeatAction::TimedOut => return Err(LinkError::HeartbeatTimeout),
                    HeartbeatAction::Idle => {}
                },
            }
        }
    }

    async fn deliver(&self, message: UpstreamMessage) -> Result<(), LinkError> {
        metrics::record_upstream_message(message.kind());
        self.feed.increment_messages();
        self.inbound_tx
            .send(message)
            .await
            .map_err(|_| LinkError::Stopped)
    }

    fn set_state(&self, state: ConnectionState) {
        self.feed.set_state(state);
        metrics::set_link_state(state);
    }

    fn emit(&self, event: LinkEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::warn!(?event, "Link event queue full, dropping event");
        }
    }
}

#[async_trait::async_trait]
impl InboundSource for UpstreamLink {
    async fn next_message(&self) -> Option<UpstreamMessage> {
        Self::next_message(self).await
    }
}

// =============================================================================
// Tests
// =============================================================================
