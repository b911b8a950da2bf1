use crate::instrument::Symbol;
use derive_more::{Display, From};
use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tracing::info;

/// Identifier of a consumer holding subscriptions, usually one live client connection.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, From, Deserialize, Serialize,
)]
pub struct ConnectionId(pub u64);

/// Callback pair invoked when a symbol's ref count crosses 0↔1.
///
/// Invoked while the [`SubscriptionRegistry`] lock is held, so implementations must not
/// block or call back into the registry.
pub trait EnrollmentListener: Send + Sync {
    fn enroll(&self, symbol: &Symbol);
    fn retire(&self, symbol: &Symbol);
}

/// Set of symbols a background worker polls.
///
/// The registry writes it through [`EnrollmentListener`]; the worker reads a snapshot at
/// the start of every cycle, so retirement takes effect at the next cycle boundary.
#[derive(Debug, Clone, Default)]
pub struct Enrollment {
    symbols: Arc<RwLock<BTreeSet<Symbol>>>,
}

impl Enrollment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enrolled symbols in a stable (sorted) order.
    pub fn snapshot(&self) -> Vec<Symbol> {
        self.symbols.read().iter().cloned().collect()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.read().contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

impl EnrollmentListener for Enrollment {
    fn enroll(&self, symbol: &Symbol) {
        self.symbols.write().insert(symbol.clone());
    }

    fn retire(&self, symbol: &Symbol) {
        self.symbols.write().remove(symbol);
    }
}

/// Effect of a subscribe or unsubscribe call on a symbol's ref count.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Transition {
    /// Ref count went 0 → 1 and the symbol was enrolled into the workers.
    Enrolled,
    /// Ref count incremented, symbol already enrolled.
    Joined,
    /// Ref count decremented, other subscribers remain.
    Left,
    /// Ref count went 1 → 0 and the symbol was retired from the workers.
    Retired,
    /// Nothing changed: duplicate subscribe or unknown connection/symbol pair.
    Unchanged,
}

#[derive(Debug, Default)]
struct RegistryState {
    subscribers: FnvHashMap<Symbol, FnvHashSet<ConnectionId>>,
    connections: FnvHashMap<ConnectionId, BTreeSet<Symbol>>,
}

impl RegistryState {
    fn remove(&mut self, connection: ConnectionId, symbol: &Symbol) -> Transition {
        let Some(subscribers) = self.subscribers.get_mut(symbol) else {
            return Transition::Unchanged;
        };
        if !subscribers.remove(&connection) {
            return Transition::Unchanged;
        }

        if let Some(symbols) = self.connections.get_mut(&connection) {
            symbols.remove(symbol);
            if symbols.is_empty() {
                self.connections.remove(&connection);
            }
        }

        if subscribers.is_empty() {
            self.subscribers.remove(symbol);
            Transition::Retired
        } else {
            Transition::Left
        }
    }
}

/// Per-symbol reference count of interested consumers, driving worker enrollment.
///
/// A symbol's ref count is the number of distinct connections subscribed to it. Every
/// count change and the matching [`EnrollmentListener`] call happen under one lock, so a
/// symbol is enrolled exactly while its ref count is above zero.
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    listeners: Vec<Arc<dyn EnrollmentListener>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new(listeners: Vec<Arc<dyn EnrollmentListener>>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            listeners,
        }
    }

    pub fn subscribe(&self, connection: ConnectionId, symbol: Symbol) -> Transition {
        let mut state = self.state.lock();

        let subscribers = state.subscribers.entry(symbol.clone()).or_default();
        if !subscribers.insert(connection) {
            return Transition::Unchanged;
        }
        let ref_count = subscribers.len();
        state.connections.entry(connection).or_default().insert(symbol.clone());

        if ref_count == 1 {
            self.listeners.iter().for_each(|listener| listener.enroll(&symbol));
            info!(%symbol, %connection, "symbol enrolled");
            Transition::Enrolled
        } else {
            Transition::Joined
        }
    }

    /// Remove `connection` from `symbol`'s subscribers. Unknown pairs are a no-op.
    pub fn unsubscribe(&self, connection: ConnectionId, symbol: &Symbol) -> Transition {
        let mut state = self.state.lock();
        let transition = state.remove(connection, symbol);
        if transition == Transition::Retired {
            self.listeners.iter().for_each(|listener| listener.retire(symbol));
            info!(%symbol, %connection, "symbol retired");
        }
        transition
    }

    /// Unsubscribe `connection` from every symbol it holds in one atomic step.
    ///
    /// Returns each released symbol paired with its transition.
    pub fn disconnect_all(&self, connection: ConnectionId) -> Vec<(Symbol, Transition)> {
        let mut state = self.state.lock();
        let Some(symbols) = state.connections.get(&connection).cloned() else {
            return Vec::new();
        };

        symbols
            .into_iter()
            .map(|symbol| {
                let transition = state.remove(connection, &symbol);
                if transition == Transition::Retired {
                    self.listeners.iter().for_each(|listener| listener.retire(&symbol));
                    info!(%symbol, %connection, "symbol retired on disconnect");
                }
                (symbol, transition)
            })
            .collect()
    }

    pub fn ref_count(&self, symbol: &Symbol) -> usize {
        self.state
            .lock()
            .subscribers
            .get(symbol)
            .map_or(0, FnvHashSet::len)
    }

    /// Connections currently subscribed to `symbol`.
    pub fn subscribers(&self, symbol: &Symbol) -> Vec<ConnectionId> {
        let mut subscribers = self
            .state
            .lock()
            .subscribers
            .get(symbol)
            .map(|set| set.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        subscribers.sort_unstable();
        subscribers
    }

    /// Symbols `connection` is subscribed to, sorted.
    pub fn symbols_of(&self, connection: ConnectionId) -> Vec<Symbol> {
        self.state
            .lock()
            .connections
            .get(&connection)
            .map(|symbols| symbols.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every symbol with a ref count above zero, sorted.
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols = self.state.lock().subscribers.keys().cloned().collect::<Vec<_>>();
        symbols.sort();
        symbols
    }
}
