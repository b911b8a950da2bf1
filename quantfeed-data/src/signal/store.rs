use super::Signal;
use crate::instrument::Symbol;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use smol_str::SmolStr;
use std::collections::VecDeque;
use tracing::debug;

/// Default [`SignalStore`] history capacity.
pub const DEFAULT_SIGNAL_HISTORY: usize = 1_000;

#[derive(Debug, Default)]
struct Inner {
    active: FnvHashMap<(Symbol, SmolStr), Signal>,
    /// Deactivated signals, newest at the back.
    history: VecDeque<Signal>,
}

/// Signals indexed by (symbol, strategy), with a bounded history of deactivated ones.
///
/// Expiry is evaluated on read: a signal past `expires_at` is never returned as active,
/// even before [`SignalStore::sweep`] moves it to history.
#[derive(Debug)]
pub struct SignalStore {
    inner: RwLock<Inner>,
    history_capacity: usize,
}

impl Default for SignalStore {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_HISTORY)
    }
}

impl SignalStore {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            history_capacity,
        }
    }

    /// Insert `signal` as the active signal for its (symbol, strategy), deactivating and
    /// returning the signal it supersedes.
    pub fn put(&self, mut signal: Signal) -> Option<Signal> {
        signal.is_active = true;
        let key = (signal.symbol.clone(), signal.strategy.clone());

        let mut inner = self.inner.write();
        let superseded = inner.active.insert(key, signal).map(|mut previous| {
            previous.is_active = false;
            previous
        });

        if let Some(previous) = &superseded {
            debug!(
                symbol = %previous.symbol,
                strategy = %previous.strategy,
                direction = %previous.direction,
                "signal superseded"
            );
            self.archive(&mut inner, previous.clone());
        }

        superseded
    }

    /// Active, unexpired signals for `symbol`, ordered by strategy.
    pub fn active_for(&self, symbol: &Symbol, now: DateTime<Utc>) -> Vec<Signal> {
        self.inner
            .read()
            .active
            .values()
            .filter(|signal| &signal.symbol == symbol && signal.is_live(now))
            .sorted_by(|a, b| a.strategy.cmp(&b.strategy))
            .cloned()
            .collect()
    }

    /// Every active, unexpired signal, ordered by symbol then strategy.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Signal> {
        self.inner
            .read()
            .active
            .values()
            .filter(|signal| signal.is_live(now))
            .sorted_by(|a, b| (&a.symbol, &a.strategy).cmp(&(&b.symbol, &b.strategy)))
            .cloned()
            .collect()
    }

    /// Move every expired signal out of the active set, returning the number moved.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();

        let expired = inner
            .active
            .iter()
            .filter(|(_, signal)| signal.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();

        for key in &expired {
            if let Some(mut signal) = inner.active.remove(key) {
                signal.is_active = false;
                self.archive(&mut inner, signal);
            }
        }

        expired.len()
    }

    /// Up to `limit` deactivated signals, newest first.
    pub fn history(&self, limit: usize) -> Vec<Signal> {
        self.inner.read().history.iter().rev().take(limit).cloned().collect()
    }

    /// Number of signals in the active set, expired or not.
    pub fn len(&self) -> usize {
        self.inner.read().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().active.is_empty()
    }

    fn archive(&self, inner: &mut Inner, signal: Signal) {
        if self.history_capacity == 0 {
            return;
        }
        if inner.history.len() == self.history_capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Direction, test_utils::signal};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_put_supersedes_previous_for_same_symbol_and_strategy() {
        let store = SignalStore::default();

        assert_eq!(store.put(signal("XYZ", Direction::Buy, 0, 3_600)), None);
        let superseded = store.put(signal("XYZ", Direction::Sell, 10, 3_600)).unwrap();

        assert_eq!(superseded.direction, Direction::Buy);
        assert!(!superseded.is_active);

        let active = store.active_for(&Symbol::new("XYZ"), at(20));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].direction, Direction::Sell);
        assert_eq!(store.history(10), vec![superseded]);
    }

    #[test]
    fn test_other_strategies_and_symbols_are_independent() {
        let store = SignalStore::default();
        let mut momentum = signal("XYZ", Direction::Sell, 0, 3_600);
        momentum.strategy = SmolStr::new("momentum");

        store.put(signal("XYZ", Direction::Buy, 0, 3_600));
        store.put(momentum);
        store.put(signal("ABC", Direction::Buy, 0, 3_600));

        let xyz = store.active_for(&Symbol::new("XYZ"), at(1));
        assert_eq!(
            xyz.iter().map(|signal| signal.strategy.as_str()).collect::<Vec<_>>(),
            vec!["momentum", "technical_v1"]
        );
        assert_eq!(store.active(at(1)).len(), 3);
        assert_eq!(store.active(at(1))[0].symbol, Symbol::new("ABC"));
    }

    #[test]
    fn test_expired_signal_is_inactive_before_and_after_sweep() {
        let store = SignalStore::default();
        store.put(signal("XYZ", Direction::Buy, 0, 60));
        store.put(signal("ABC", Direction::Buy, 0, 600));

        // Lazily expired on read
        assert!(store.active_for(&Symbol::new("XYZ"), at(60)).is_empty());
        assert_eq!(store.len(), 2);

        assert_eq!(store.sweep(at(60)), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.history(10).len(), 1);
        assert!(!store.history(10)[0].is_active);
        assert_eq!(store.sweep(at(60)), 0);
    }

    #[test]
    fn test_history_is_bounded_and_newest_first() {
        let store = SignalStore::new(2);
        for secs in 0..4 {
            store.put(signal("XYZ", Direction::Buy, secs, 3_600));
        }

        let history = store.history(10);
        assert_eq!(
            history.iter().map(|signal| signal.generated_at).collect::<Vec<_>>(),
            vec![at(2), at(1)]
        );
        assert_eq!(store.history(1).len(), 1);
    }

    #[test]
    fn test_at_most_one_active_signal_per_key_under_concurrent_puts() {
        use std::sync::Arc;

        let store = Arc::new(SignalStore::default());
        let handles = (0..4)
            .map(|thread| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for secs in 0..100 {
                        store.put(signal("XYZ", Direction::Buy, thread * 1_000 + secs, 3_600));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.active_for(&Symbol::new("XYZ"), at(0)).len(), 1);
        assert!(store.history(1_000).iter().all(|signal| !signal.is_active));
        assert_eq!(store.history(1_000).len(), 399);
    }
}
