//! Link Status Publisher
//!
//! Turns upstream [`LinkEvent`]s into log lines and pushes
//! `{"type":"status"}` events to every client when the link goes up or
//! down.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::application::services::FanoutRouter;
use crate::domain::streaming::FeedState;
use crate::infrastructure::finnhub::LinkEvent;

/// Consume link events until the link drops its sender.
///
/// Events only wake the publisher; the pushed status is read from `feed`,
/// so an event lost to a full queue is corrected by the next one.
pub async fn publish_link_status(
    mut events: mpsc::Receiver<LinkEvent>,
    feed: Arc<FeedState>,
    router: Arc<FanoutRouter>,
) {
    let mut connected = false;

    while let Some(event) = events.recv().await {
        match &event {
            LinkEvent::Connecting => tracing::debug!("Upstream connecting"),
            LinkEvent::Connected { replayed } => tracing::info!(replayed, "Upstream connected"),
            LinkEvent::Disconnected { reason } => tracing::warn!(%reason, "Upstream disconnected"),
            LinkEvent::Reconnecting { attempt, delay } => tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Upstream reconnecting"
            ),
        }

        let now_connected = feed.is_connected();
        if now_connected != connected {
            connected = now_connected;
            let notified = router.broadcast_status(connected);
            tracing::debug!(connected, notified, "Status pushed to clients");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;
    use crate::application::services::{ClientDirectory, ClientRegistration};
    use crate::domain::streaming::ConnectionState;
    use crate::domain::subscription::SubscriptionRegistry;

    struct Fixture {
        feed: Arc<FeedState>,
        router: Arc<FanoutRouter>,
        client: ClientRegistration,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(ClientDirectory::new(16));
        let feed = Arc::new(FeedState::new());
        let router = Arc::new(FanoutRouter::new(
            Arc::new(SubscriptionRegistry::new()),
            directory.clone(),
            feed.clone(),
        ));
        let client = directory.register();
        Fixture { feed, router, client }
    }

    fn pushed(client: &mut ClientRegistration) -> Vec<Value> {
        std::iter::from_fn(|| client.receiver.try_recv().ok())
            .map(|e| serde_json::from_str(e.as_str()).unwrap())
            .collect()
    }

    fn status(connected: bool) -> Value {
        json!({"type": "status", "connected": connected})
    }

    #[tokio::test]
    async fn only_transitions_are_pushed() {
        let mut f = fixture();
        let (tx, rx) = mpsc::channel(1);
        let publisher = tokio::spawn(publish_link_status(rx, f.feed.clone(), f.router.clone()));

        for (state, event) in [
            (ConnectionState::Connecting, LinkEvent::Connecting),
            (ConnectionState::Connected, LinkEvent::Connected { replayed: 0 }),
            (
                ConnectionState::Disconnected,
                LinkEvent::Disconnected { reason: "closed".into() },
            ),
            (
                ConnectionState::Reconnecting,
                LinkEvent::Reconnecting { attempt: 1, delay: Duration::from_secs(1) },
            ),
            (ConnectionState::Connecting, LinkEvent::Connecting),
            (ConnectionState::Connected, LinkEvent::Connected { replayed: 2 }),
        ] {
            f.feed.set_state(state);
            tx.send(event).await.unwrap();
            while tx.capacity() < tx.max_capacity() {
                tokio::task::yield_now().await;
            }
        }
        drop(tx);
        publisher.await.unwrap();

        assert_eq!(pushed(&mut f.client), vec![status(true), status(false), status(true)]);
    }

    #[tokio::test]
    async fn lost_transition_is_corrected_by_the_next_event() {
        let mut f = fixture();
        let (tx, rx) = mpsc::channel(16);

        // The Connected event never arrives; the next event still reports it.
        f.feed.set_state(ConnectionState::Connected);
        tx.send(LinkEvent::Connecting).await.unwrap();
        drop(tx);

        publish_link_status(rx, f.feed.clone(), f.router.clone()).await;

        assert_eq!(pushed(&mut f.client), vec![status(true)]);
    }
}
