//! Subscription Service
//!
//! Applies client interest changes to the [`SubscriptionRegistry`] and
//! forwards the resulting upstream commands to the link's command queue.
//!
//! Mutations that cannot change whether a symbol is subscribed upstream are
//! applied straight away. The others first reserve a queue slot, waiting for
//! capacity without holding the registry lock, then mutate the registry and
//! enqueue the command while the lock is held. Commands for a symbol
//! therefore reach the queue in mutation order, and a full queue only stalls
//! clients whose change needs an upstream command.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::streaming::UpstreamCommand;
use crate::domain::subscription::{ClientId, InterestTransition, SubscriptionRegistry, Symbol};
use crate::infrastructure::metrics;

/// Registry front end that emits upstream commands.
#[derive(Debug, Clone)]
pub struct SubscriptionService {
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::Sender<UpstreamCommand>,
}

impl SubscriptionService {
    /// Create a service over `registry` that emits into `commands`.
    #[must_use]
    pub const fn new(
        registry: Arc<SubscriptionRegistry>,
        commands: mpsc::Sender<UpstreamCommand>,
    ) -> Self {
        Self { registry, commands }
    }

    /// The underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Record that `client` wants `symbol`.
    pub async fn add_interest(&self, client: ClientId, symbol: &Symbol) -> InterestTransition {
        let transition = match self.registry.add_interest_if_active(client, symbol) {
            Some(transition) => transition,
            None => {
                let permit = self.commands.reserve().await.ok();
                self.registry
                    .add_interest(client, symbol, |command| Self::enqueue(permit, command))
            }
        };
        self.after(client, symbol, transition);
        transition
    }

    /// Record that `client` no longer wants `symbol`.
    pub async fn remove_interest(&self, client: ClientId, symbol: &Symbol) -> InterestTransition {
        let transition = match self.registry.remove_interest_unless_last(client, symbol) {
            Some(transition) => transition,
            None => {
                let permit = self.commands.reserve().await.ok();
                self.registry
                    .remove_interest(client, symbol, |command| Self::enqueue(permit, command))
            }
        };
        self.after(client, symbol, transition);
        transition
    }

    /// Release every interest `client` holds.
    ///
    /// Returns how many symbols lost their last client.
    pub async fn remove_client(&self, client: ClientId) -> usize {
        let mut deactivated = 0;
        for symbol in self.registry.client_symbols(client) {
            if self.remove_interest(client, &symbol).await == InterestTransition::Deactivated {
                deactivated += 1;
            }
        }
        deactivated
    }

    /// Clients currently interested in `symbol`.
    #[must_use]
    pub fn interested_clients(&self, symbol: &Symbol) -> Vec<ClientId> {
        self.registry.interested_clients(symbol)
    }

    fn enqueue(permit: Option<mpsc::Permit<'_, UpstreamCommand>>, command: UpstreamCommand) {
        match permit {
            Some(permit) => permit.send(command),
            None => tracing::warn!(
                symbol = %command.symbol,
                action = ?command.action,
                "Upstream link stopped, dropping command"
            ),
        }
    }

    fn after(&self, client: ClientId, symbol: &Symbol, transition: InterestTransition) {
        match transition {
            InterestTransition::Activated | InterestTransition::Deactivated => {
                tracing::info!(%client, %symbol, ?transition, "Upstream subscription changed");
                metrics::set_active_symbols(self.registry.stats().symbol_count);
            }
            InterestTransition::Updated => {
                tracing::debug!(%client, %symbol, "Interest updated");
            }
            InterestTransition::Unchanged => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::CommandAction;

    fn sym(raw: &str) -> Symbol {
        Symbol::parse(raw).unwrap()
    }

    fn service(capacity: usize) -> (SubscriptionService, mpsc::Receiver<UpstreamCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            SubscriptionService::new(Arc::new(SubscriptionRegistry::new()), tx),
            rx,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<UpstreamCommand>) -> Vec<UpstreamCommand> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn emits_only_on_reference_count_edges() {
        let (service, mut rx) = service(8);
        let (a, b) = (ClientId::generate(), ClientId::generate());

        service.add_interest(a, &sym("aapl")).await;
        service.add_interest(b, &sym("AAPL")).await;
        service.add_interest(b, &sym("AAPL")).await;
        service.remove_interest(a, &sym("AAPL")).await;
        service.remove_interest(b, &sym("AAPL")).await;
        service.remove_interest(b, &sym("AAPL")).await;

        assert_eq!(
            drain(&mut rx),
            vec![
                UpstreamCommand::subscribe(sym("AAPL")),
                UpstreamCommand::unsubscribe(sym("AAPL")),
            ]
        );
    }

    #[tokio::test]
    async fn remove_client_releases_every_symbol() {
        let (service, mut rx) = service(8);
        let (a, b) = (ClientId::generate(), ClientId::generate());
        service.add_interest(a, &sym("AAPL")).await;
        service.add_interest(a, &sym("MSFT")).await;
        service.add_interest(b, &sym("MSFT")).await;
        drain(&mut rx);

        let deactivated = service.remove_client(a).await;

        assert_eq!(deactivated, 1);
        assert_eq!(drain(&mut rx), vec![UpstreamCommand::unsubscribe(sym("AAPL"))]);
        assert_eq!(service.interested_clients(&sym("MSFT")), vec![b]);
        assert!(service.registry().client_symbols(a).is_empty());
    }

    #[tokio::test]
    async fn full_queue_blocks_the_mutation() {
        use tokio_test::{assert_pending, assert_ready, task};

        let (service, mut rx) = service(1);
        let client = ClientId::generate();
        service.add_interest(client, &sym("AAPL")).await;

        let msft = sym("MSFT");
        let mut blocked = task::spawn(service.add_interest(client, &msft));
        assert_pending!(blocked.poll());
        assert!(!service.registry().is_interested(client, &msft));

        assert_eq!(rx.recv().await.unwrap().symbol, sym("AAPL"));
        assert!(blocked.is_woken());
        assert_eq!(assert_ready!(blocked.poll()), InterestTransition::Activated);
        assert_eq!(rx.recv().await.unwrap().symbol, msft);
    }

    #[tokio::test]
    async fn full_queue_does_not_block_shared_symbols() {
        use tokio_test::{assert_ready, task};

        let (service, mut rx) = service(1);
        let (a, b) = (ClientId::generate(), ClientId::generate());
        let aapl = sym("AAPL");
        service.add_interest(a, &aapl).await;

        let mut join = task::spawn(service.add_interest(b, &aapl));
        assert_eq!(assert_ready!(join.poll()), InterestTransition::Updated);

        let mut departed = task::spawn(service.remove_client(a));
        assert_eq!(assert_ready!(departed.poll()), 0);

        assert_eq!(service.interested_clients(&aapl), vec![b]);
        assert_eq!(drain(&mut rx), vec![UpstreamCommand::subscribe(aapl.clone())]);
    }

    #[tokio::test]
    async fn closed_queue_still_updates_registry() {
        let (service, rx) = service(1);
        drop(rx);
        let client = ClientId::generate();

        let transition = service.add_interest(client, &sym("AAPL")).await;

        assert_eq!(transition, InterestTransition::Activated);
        assert_eq!(service.registry().active_symbols(), vec![sym("AAPL")]);
    }

    #[tokio::test]
    async fn concurrent_mutations_keep_per_symbol_order() {
        let (service, mut rx) = service(1024);
        let clients: Vec<_> = (0..16).map(|_| ClientId::generate()).collect();

        let mut handles = Vec::new();
        for &client in &clients {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    service.add_interest(client, &sym("AAPL")).await;
                    service.remove_interest(client, &sym("AAPL")).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let commands = drain(&mut rx);
        assert!(!commands.is_empty());
        for pair in commands.chunks(2) {
            assert_eq!(pair[0].action, CommandAction::Subscribe);
            assert_eq!(pair.get(1).map(|c| c.action), Some(CommandAction::Unsubscribe));
        }
        assert!(service.registry().active_symbols().is_empty());
    }
}
