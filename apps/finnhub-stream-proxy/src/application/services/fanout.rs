//! Fan-out Router
//!
//! Consumes classified upstream messages and delivers each trade entry
//! to the clients interested in its symbol. Entries are handled in
//! arrival order and each client has a single FIFO queue, so per-symbol
//! order is preserved.
//!
//! Non-trade messages are never sent to clients. Provider errors are
//! recorded on the [`FeedState`].

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::directory::{ClientDirectory, Delivery};
use crate::application::ports::InboundSource;
use crate::domain::session::ClientEvent;
use crate::domain::streaming::{FeedState, TradeEntry, UpstreamMessage};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics::{self, DropReason};

/// Per-message delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Events queued to clients.
    pub delivered: usize,
    /// Events dropped because a client queue was full.
    pub dropped: usize,
    /// Clients scheduled for removal because their queue was closed.
    pub evicted: usize,
}

/// Routes upstream trades to interested clients.
#[derive(Debug)]
pub struct FanoutRouter {
    registry: Arc<SubscriptionRegistry>,
    directory: Arc<ClientDirectory>,
    feed: Arc<FeedState>,
}

impl FanoutRouter {
    /// Create a router.
    #[must_use]
    pub const fn new(
        registry: Arc<SubscriptionRegistry>,
        directory: Arc<ClientDirectory>,
        feed: Arc<FeedState>,
    ) -> Self {
        Self {
            registry,
            directory,
            feed,
        }
    }

    /// Consume `source` until it ends or `cancel` fires.
    pub async fn run(self: Arc<Self>, source: Arc<dyn InboundSource>, cancel: CancellationToken) {
        tracing::info!("Fan-out router started");

        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = source.next_message() => message,
            };
            let Some(message) = message else {
                break;
            };

            let started = Instant::now();
            self.route(message);
            metrics::record_fanout_duration(started.elapsed());
        }

        tracing::info!("Fan-out router stopped");
    }

    /// Route one message.
    pub fn route(&self, message: UpstreamMessage) -> RouteOutcome {
        match message {
            UpstreamMessage::Trades(entries) => {
                let mut outcome = RouteOutcome::default();
                for entry in entries {
                    self.route_trade(entry, &mut outcome);
                }
                if outcome.dropped > 0 {
                    metrics::record_trades_dropped(DropReason::QueueFull, outcome.dropped as u64);
                }
                if outcome.evicted > 0 {
                    metrics::record_trades_dropped(DropReason::ClientGone, outcome.evicted as u64);
                }
                metrics::record_trades_delivered(outcome.delivered as u64);
                outcome
            }
            UpstreamMessage::Ping => {
                tracing::trace!("Upstream ping");
                RouteOutcome::default()
            }
            UpstreamMessage::Error(msg) => {
                tracing::warn!(error = %msg, "Upstream reported an error");
                self.feed.set_error(msg);
                RouteOutcome::default()
            }
            UpstreamMessage::Other(value) => {
                tracing::debug!(
                    kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("unknown"),
                    "Ignoring upstream message"
                );
                RouteOutcome::default()
            }
            UpstreamMessage::Unclassified(raw) => {
                tracing::debug!(len = raw.len(), "Ignoring unparseable upstream frame");
                RouteOutcome::default()
            }
        }
    }

    /// Push a status event to every client.
    pub fn broadcast_status(&self, connected: bool) -> usize {
        match (ClientEvent::Status { connected }).encode() {
            Ok(event) => self.directory.broadcast(&event),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode status event");
                0
            }
        }
    }

    fn route_trade(&self, entry: TradeEntry, outcome: &mut RouteOutcome) {
        let clients = self.registry.interested_clients(&entry.symbol);
        if clients.is_empty() {
            return;
        }

        let event = ClientEvent::Trade {
            symbol: entry.symbol,
            data: entry.data,
        };
        let encoded = match event.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode trade event");
                return;
            }
        };

        for client in clients {
            match self.directory.deliver(client, &encoded) {
                Delivery::Sent => outcome.delivered += 1,
                Delivery::Dropped => outcome.dropped += 1,
                Delivery::Closed => outcome.evicted += 1,
                Delivery::Unknown => {}
            }
        }
    }
}
