//! Subscription Management Types
//!
//! Domain types for tracking which clients want which symbols.
//!
//! # Design
//!
//! The registry tracks:
//! - The set of interested clients per symbol (the interest map)
//! - The set of symbols per client (the per-client index)
//!
//! Both views are updated under one lock, so they never disagree.
//! Many clients may want the same symbol while exactly one upstream
//! subscription exists for it: the upstream subscribe is emitted when the
//! interest set goes from empty to non-empty and the unsubscribe when it
//! goes back to empty.
//!
//! Emission happens through a caller-supplied closure invoked while the
//! lock is still held. Callers enqueue the command there, which makes the
//! mutation and its command one atomic step and keeps commands for a
//! symbol in mutation order.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize, Serializer};

use super::streaming::UpstreamCommand;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a connected downstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A normalized ticker symbol.
///
/// Symbols are trimmed and uppercased on construction, so `"aapl"` and
/// `" AAPL "` name the same symbol. The empty string is not a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a raw symbol, returning `None` if nothing is left.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_uppercase()))
    }

    /// The normalized text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or("symbol must not be empty")
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What a registry mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestTransition {
    /// Nothing changed (duplicate add, or removal of absent interest).
    Unchanged,
    /// The interest set changed but stayed non-empty.
    Updated,
    /// The symbol gained its first client; a subscribe was emitted.
    Activated,
    /// The symbol lost its last client; an unsubscribe was emitted.
    Deactivated,
}

impl InterestTransition {
    /// Whether the mutation changed the registry.
    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

// =============================================================================
// Interest State
// =============================================================================

#[derive(Debug, Default)]
struct InterestState {
    /// Symbol to the clients that want it. Never holds an empty set.
    interest: HashMap<Symbol, HashSet<ClientId>>,
    /// Client to the symbols it wants. Never holds an empty set.
    client_symbols: HashMap<ClientId, HashSet<Symbol>>,
}

impl InterestState {
    fn add(&mut self, client: ClientId, symbol: &Symbol) -> InterestTransition {
        let clients = self.interest.entry(symbol.clone()).or_default();
        if !clients.insert(client) {
            return InterestTransition::Unchanged;
        }
        let first = clients.len() == 1;

        self.client_symbols
            .entry(client)
            .or_default()
            .insert(symbol.clone());

        if first {
            InterestTransition::Activated
        } else {
            InterestTransition::Updated
        }
    }

    /// Whether `symbol` already has a client, so adding one cannot activate it.
    fn is_active(&self, symbol: &Symbol) -> bool {
        self.interest.contains_key(symbol)
    }

    /// Whether removing `client` would leave `symbol` with no clients.
    fn is_last(&self, client: ClientId, symbol: &Symbol) -> bool {
        self.interest
            .get(symbol)
            .is_some_and(|clients| clients.len() == 1 && clients.contains(&client))
    }

    fn remove(&mut self, client: ClientId, symbol: &Symbol) -> InterestTransition {
        let Some(clients) = self.interest.get_mut(symbol) else {
            return InterestTransition::Unchanged;
        };
        if !clients.remove(&client) {
            return InterestTransition::Unchanged;
        }
        let last = clients.is_empty();
        if last {
            self.interest.remove(symbol);
        }

        if let Some(symbols) = self.client_symbols.get_mut(&client) {
            symbols.remove(symbol);
            if symbols.is_empty() {
                self.client_symbols.remove(&client);
            }
        }

        if last {
            InterestTransition::Deactivated
        } else {
            InterestTransition::Updated
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of client interest in symbols.
///
/// # Example
///
/// ```rust
/// use finnhub_stream_proxy::domain::subscription::{
///     ClientId, InterestTransition, SubscriptionRegistry, Symbol,
/// };
///
/// let registry = SubscriptionRegistry::new();
/// let aapl = Symbol::parse("aapl").unwrap();
/// let (first, second) = (ClientId::generate(), ClientId::generate());
/// let mut commands = Vec::new();
///
/// // First client: upstream subscribe
/// let t = registry.add_interest(first, &aapl, |cmd| commands.push(cmd));
/// assert_eq!(t, InterestTransition::Activated);
///
/// // Second client shares the upstream subscription
/// let t = registry.add_interest(second, &aapl, |cmd| commands.push(cmd));
/// assert_eq!(t, InterestTransition::Updated);
///
/// // Only the last removal unsubscribes upstream
/// registry.remove_interest(first, &aapl, |cmd| commands.push(cmd));
/// registry.remove_interest(second, &aapl, |cmd| commands.push(cmd));
/// assert_eq!(commands.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<InterestState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `client` wants `symbol`.
    ///
    /// `emit` is called with a subscribe command, while the registry lock
    /// is held, only when this is the symbol's first client.
    pub fn add_interest<F>(&self, client: ClientId, symbol: &Symbol, emit: F) -> InterestTransition
    where
        F: FnOnce(UpstreamCommand),
    {
        let mut state = self.state.lock();
        let transition = state.add(client, symbol);
        if transition == InterestTransition::Activated {
            emit(UpstreamCommand::subscribe(symbol.clone()));
        }
        transition
    }

    /// Record that `client` no longer wants `symbol`.
    ///
    /// `emit` is called with an unsubscribe command, while the registry
    /// lock is held, only when this was the symbol's last client.
    pub fn remove_interest<F>(
        &self,
        client: ClientId,
        symbol: &Symbol,
        emit: F,
    ) -> InterestTransition
    where
        F: FnOnce(UpstreamCommand),
    {
        let mut state = self.state.lock();
        let transition = state.remove(client, symbol);
        if transition == InterestTransition::Deactivated {
            emit(UpstreamCommand::unsubscribe(symbol.clone()));
        }
        transition
    }

    /// Add interest only if it cannot activate `symbol`.
    ///
    /// Returns `None`, leaving the registry untouched, when `symbol` has no
    /// clients yet and the caller must go through [`Self::add_interest`].
    pub fn add_interest_if_active(
        &self,
        client: ClientId,
        symbol: &Symbol,
    ) -> Option<InterestTransition> {
        let mut state = self.state.lock();
        state.is_active(symbol).then(|| state.add(client, symbol))
    }

    /// Remove interest only if it cannot deactivate `symbol`.
    ///
    /// Returns `None`, leaving the registry untouched, when `client` is the
    /// symbol's last client.
    pub fn remove_interest_unless_last(
        &self,
        client: ClientId,
        symbol: &Symbol,
    ) -> Option<InterestTransition> {
        let mut state = self.state.lock();
        (!state.is_last(client, symbol)).then(|| state.remove(client, symbol))
    }

    /// Clients currently interested in `symbol`.
    #[must_use]
    pub fn interested_clients(&self, symbol: &Symbol) -> Vec<ClientId> {
        self.state
            .lock()
            .interest
            .get(symbol)
            .map(|clients| clients.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Symbols with at least one interested client, sorted.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.state.lock().interest.keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    /// Symbols `client` is interested in, sorted.
    #[must_use]
    pub fn client_symbols(&self, client: ClientId) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self
            .state
            .lock()
            .client_symbols
            .get(&client)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort_unstable();
        symbols
    }

    /// Whether `client` is interested in `symbol`.
    #[must_use]
    pub fn is_interested(&self, client: ClientId, symbol: &Symbol) -> bool {
        self.state
            .lock()
            .interest
            .get(symbol)
            .is_some_and(|clients| clients.contains(&client))
    }

    /// Current counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.lock();
        SubscriptionStats {
            symbol_count: state.interest.len(),
            client_count: state.client_symbols.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of symbols with at least one client.
    pub symbol_count: usize,
    /// Number of clients with at least one symbol.
    pub client_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::CommandAction;

    fn sym(raw: &str) -> Symbol {
        Symbol::parse(raw).unwrap()
    }

    fn add(registry: &SubscriptionRegistry, client: ClientId, raw: &str) -> Vec<UpstreamCommand> {
        let mut out = Vec::new();
        registry.add_interest(client, &sym(raw), |cmd| out.push(cmd));
        out
    }

    fn remove(registry: &SubscriptionRegistry, client: ClientId, raw: &str) -> Vec<UpstreamCommand> {
        let mut out = Vec::new();
        registry.remove_interest(client, &sym(raw), |cmd| out.push(cmd));
        out
    }

    #[test]
    fn symbol_is_normalized() {
        assert_eq!(sym(" aapl ").as_str(), "AAPL");
        assert_eq!(sym("BINANCE:btcusdt").as_str(), "BINANCE:BTCUSDT");
        assert!(Symbol::parse("").is_none());
        assert!(Symbol::parse("   ").is_none());
    }

    #[test]
    fn symbol_deserializes_through_normalization() {
        let symbol: Symbol = serde_json::from_str(r#""msft""#).unwrap();
        assert_eq!(symbol.as_str(), "MSFT");
        assert!(serde_json::from_str::<Symbol>(r#""""#).is_err());
    }

    #[test]
    fn first_interest_subscribes_upstream() {
        let registry = SubscriptionRegistry::new();
        let commands = add(&registry, ClientId::generate(), "aapl");

        assert_eq!(commands, vec![UpstreamCommand::subscribe(sym("AAPL"))]);
    }

    #[test]
    fn second_client_shares_subscription() {
        let registry = SubscriptionRegistry::new();
        add(&registry, ClientId::generate(), "AAPL");

        let commands = add(&registry, ClientId::generate(), "AAPL");

        assert!(commands.is_empty());
        assert_eq!(registry.interested_clients(&sym("AAPL")).len(), 2);
    }

    #[test]
    fn duplicate_add_is_unchanged() {
        let registry = SubscriptionRegistry::new();
        let client = ClientId::generate();
        add(&registry, client, "AAPL");

        let transition = registry.add_interest(client, &sym("aapl"), |_| panic!("emitted"));

        assert_eq!(transition, InterestTransition::Unchanged);
        assert!(!transition.changed());
    }

    #[test]
    fn last_removal_unsubscribes_upstream() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (ClientId::generate(), ClientId::generate());
        add(&registry, a, "AAPL");
        add(&registry, b, "AAPL");

        assert!(remove(&registry, a, "AAPL").is_empty());
        let commands = remove(&registry, b, "AAPL");

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].action, CommandAction::Unsubscribe);
        assert!(registry.active_symbols().is_empty());
    }

    #[test]
    fn removing_absent_interest_is_unchanged() {
        let registry = SubscriptionRegistry::new();
        let client = ClientId::generate();

        let transition = registry.remove_interest(client, &sym("AAPL"), |_| panic!("emitted"));
        assert_eq!(transition, InterestTransition::Unchanged);

        add(&registry, ClientId::generate(), "AAPL");
        let transition = registry.remove_interest(client, &sym("AAPL"), |_| panic!("emitted"));
        assert_eq!(transition, InterestTransition::Unchanged);
        assert_eq!(registry.active_symbols(), vec![sym("AAPL")]);
    }

    #[test]
    fn shared_mutations_apply_without_an_edge() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (ClientId::generate(), ClientId::generate());

        assert_eq!(registry.add_interest_if_active(a, &sym("AAPL")), None);
        assert!(!registry.is_interested(a, &sym("AAPL")));

        add(&registry, a, "AAPL");
        assert_eq!(
            registry.add_interest_if_active(b, &sym("AAPL")),
            Some(InterestTransition::Updated)
        );
        assert_eq!(
            registry.add_interest_if_active(b, &sym("AAPL")),
            Some(InterestTransition::Unchanged)
        );

        assert_eq!(
            registry.remove_interest_unless_last(a, &sym("AAPL")),
            Some(InterestTransition::Updated)
        );
        assert_eq!(registry.remove_interest_unless_last(b, &sym("AAPL")), None);
        assert_eq!(registry.interested_clients(&sym("AAPL")), vec![b]);
        assert_eq!(
            registry.remove_interest_unless_last(a, &sym("MSFT")),
            Some(InterestTransition::Unchanged)
        );
    }

    #[test]
    fn client_index_tracks_interest_map() {
        let registry = SubscriptionRegistry::new();
        let client = ClientId::generate();
        add(&registry, client, "MSFT");
        add(&registry, client, "AAPL");

        assert_eq!(registry.client_symbols(client), vec![sym("AAPL"), sym("MSFT")]);
        assert!(registry.is_interested(client, &sym("msft")));

        remove(&registry, client, "MSFT");
        remove(&registry, client, "AAPL");

        assert!(registry.client_symbols(client).is_empty());
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn stats_are_accurate() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (ClientId::generate(), ClientId::generate());
        add(&registry, a, "AAPL");
        add(&registry, a, "MSFT");
        add(&registry, b, "AAPL");

        let stats = registry.stats();
        assert_eq!(stats.symbol_count, 2);
        assert_eq!(stats.client_count, 2);
    }

    #[test]
    fn concurrent_access_keeps_counts_consistent() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let clients: Vec<_> = (0..10).map(|_| ClientId::generate()).collect();

        let handles: Vec<_> = clients
            .iter()
            .map(|&client| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut emitted = 0;
                    for raw in ["AAPL", "MSFT", "GOOG"] {
                        registry.add_interest(client, &sym(raw), |_| emitted += 1);
                    }
                    emitted
                })
            })
            .collect();

        let subscribes: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(subscribes, 3);
        assert_eq!(registry.stats().client_count, 10);
        assert_eq!(registry.interested_clients(&sym("GOOG")).len(), 10);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Add(usize, usize),
            Remove(usize, usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0..4usize, 0..3usize).prop_map(|(c, s)| Op::Add(c, s)),
                (0..4usize, 0..3usize).prop_map(|(c, s)| Op::Remove(c, s)),
            ]
        }

        proptest! {
            #[test]
            fn upstream_commands_track_interest(ops in prop::collection::vec(op(), 0..64)) {
                let registry = SubscriptionRegistry::new();
                let clients: Vec<_> = (0..4).map(|_| ClientId::generate()).collect();
                let symbols = [sym("AAPL"), sym("MSFT"), sym("GOOG")];
                let mut upstream: HashSet<Symbol> = HashSet::new();

                for op in ops {
                    let mut emitted = Vec::new();
                    match op {
                        Op::Add(c, s) => {
                            registry.add_interest(clients[c], &symbols[s], |cmd| emitted.push(cmd));
                        }
                        Op::Remove(c, s) => {
                            registry.remove_interest(clients[c], &symbols[s], |cmd| emitted.push(cmd));
                        }
                    }
                    for cmd in emitted {
                        match cmd.action {
                            CommandAction::Subscribe => prop_assert!(upstream.insert(cmd.symbol)),
                            CommandAction::Unsubscribe => prop_assert!(upstream.remove(&cmd.symbol)),
                        }
                    }

                    let active: HashSet<_> = registry.active_symbols().into_iter().collect();
                    prop_assert_eq!(&active, &upstream);
                    for symbol in &symbols {
                        for client in registry.interested_clients(symbol) {
                            prop_assert!(registry.client_symbols(client).contains(symbol));
                        }
                    }
                }
            }
        }
    }
}
