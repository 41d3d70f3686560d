//! Client Directory
//!
//! Maps each connected client to its bounded outbound queue and a close
//! token. The fan-out router delivers through the directory; a client
//! whose queue has closed is unregistered and its close token cancelled,
//! which ends its session and releases its interest.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::session::EncodedEvent;
use crate::domain::subscription::ClientId;
use crate::infrastructure::metrics;

/// Result of delivering one event to one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued.
    Sent,
    /// The client's queue was full; the event was dropped for this client.
    Dropped,
    /// The client's queue was closed; the client was scheduled for removal.
    Closed,
    /// No such client.
    Unknown,
}

#[derive(Debug)]
struct ClientHandle {
    sender: mpsc::Sender<EncodedEvent>,
    close: CancellationToken,
}

/// A freshly registered client.
#[derive(Debug)]
pub struct ClientRegistration {
    /// The client's identity.
    pub id: ClientId,
    /// Sender half of the outbound queue, for the session's own replies.
    pub sender: mpsc::Sender<EncodedEvent>,
    /// Receiver half of the outbound queue, drained by the socket writer.
    pub receiver: mpsc::Receiver<EncodedEvent>,
    /// Cancelled when the client should be disconnected.
    pub close: CancellationToken,
}

/// Connected clients and their outbound queues.
#[derive(Debug)]
pub struct ClientDirectory {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    queue_capacity: usize,
}

impl ClientDirectory {
    /// Create a directory whose clients get queues of `queue_capacity`.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Allocate an identity and outbound queue for a new client.
    pub fn register(&self) -> ClientRegistration {
        let id = ClientId::generate();
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let close = CancellationToken::new();

        let count = {
            let mut clients = self.clients.write();
            clients.insert(
                id,
                ClientHandle {
                    sender: sender.clone(),
                    close: close.clone(),
                },
            );
            clients.len()
        };
        metrics::set_clients(count);
        tracing::info!(client_id = %id, total = count, "Client connected");

        ClientRegistration {
            id,
            sender,
            receiver,
            close,
        }
    }

    /// Forget a client. Returns `false` if it was already gone.
    pub fn unregister(&self, id: ClientId) -> bool {
        let (removed, count) = {
            let mut clients = self.clients.write();
            let removed = clients.remove(&id);
            (removed, clients.len())
        };

        let Some(handle) = removed else {
            return false;
        };
        handle.close.cancel();
        metrics::set_clients(count);
        tracing::info!(client_id = %id, total = count, "Client disconnected");
        true
    }

    /// Try to queue `event` for one client without waiting.
    pub fn deliver(&self, id: ClientId, event: &EncodedEvent) -> Delivery {
        let result = {
            let clients = self.clients.read();
            let Some(handle) = clients.get(&id) else {
                return Delivery::Unknown;
            };
            handle.sender.try_send(event.clone())
        };

        match result {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(client_id = %id, "Client queue full, dropping event");
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(client_id = %id, "Client queue closed, scheduling removal");
                self.unregister(id);
                Delivery::Closed
            }
        }
    }

    /// Queue `event` for every client. Returns how many accepted it.
    pub fn broadcast(&self, event: &EncodedEvent) -> usize {
        let ids: Vec<_> = self.clients.read().keys().copied().collect();
        ids.into_iter()
            .filter(|&id| self.deliver(id, event) == Delivery::Sent)
            .count()
    }

    /// Number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether no clients are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.read().contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::ClientEvent;

    fn event() -> EncodedEvent {
        ClientEvent::Pong.encode().unwrap()
    }

    #[test]
    fn register_and_unregister() {
        let directory = ClientDirectory::new(4);
        let registration = directory.register();

        assert!(directory.contains(registration.id));
        assert_eq!(directory.len(), 1);

        assert!(directory.unregister(registration.id));
        assert!(!directory.unregister(registration.id));
        assert!(directory.is_empty());
        assert!(registration.close.is_cancelled());
    }

    #[test]
    fn full_queue_drops_for_that_client_only() {
        let directory = ClientDirectory::new(1);
        let slow = directory.register();
        let mut fast = directory.register();

        assert_eq!(directory.deliver(slow.id, &event()), Delivery::Sent);
        assert_eq!(directory.deliver(slow.id, &event()), Delivery::Dropped);
        assert_eq!(directory.deliver(fast.id, &event()), Delivery::Sent);

        assert!(fast.receiver.try_recv().is_ok());
        assert!(directory.contains(slow.id));
    }

    #[test]
    fn closed_queue_schedules_removal() {
        let directory = ClientDirectory::new(4);
        let ClientRegistration {
            id,
            sender,
            receiver,
            close,
        } = directory.register();
        drop(sender);
        drop(receiver);

        assert_eq!(directory.deliver(id, &event()), Delivery::Closed);
        assert!(!directory.contains(id));
        assert!(close.is_cancelled());
        assert_eq!(directory.deliver(id, &event()), Delivery::Unknown);
    }

    #[test]
    fn broadcast_reaches_every_client() {
        let directory = ClientDirectory::new(4);
        let mut clients: Vec<_> = (0..3).map(|_| directory.register()).collect();

        assert_eq!(directory.broadcast(&event()), 3);
        for client in &mut clients {
            assert_eq!(client.receiver.try_recv().unwrap(), event());
        }
    }
}
