use crate::{instrument::Symbol, quote::PriceTick};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default [`PriceCache`] entry time-to-live.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    tick: PriceTick,
    refreshed_at: Instant,
}

/// Outcome of a [`PriceCache::put`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PutOutcome {
    /// Tick stored, it is now the latest observation for its symbol.
    Stored,
    /// Tick is older than the stored one and was ignored.
    Stale,
}

/// Ephemeral latest-tick-per-symbol store with a per-entry TTL.
///
/// Writes never move a symbol's stored timestamp backwards. Expiry is advisory: an entry
/// past its TTL reads as absent and is evicted by [`PriceCache::sweep_expired`], but
/// until evicted it still takes part in the timestamp comparison.
#[derive(Debug)]
pub struct PriceCache {
    ttl: Duration,
    entries: RwLock<FnvHashMap<Symbol, Entry>>,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(FnvHashMap::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `tick` if it is at least as recent as the cached tick for its symbol.
    pub fn put(&self, tick: PriceTick) -> PutOutcome {
        self.put_at(tick, Instant::now())
    }

    fn put_at(&self, tick: PriceTick, now: Instant) -> PutOutcome {
        let mut entries = self.entries.write();
        match entries.get_mut(&tick.symbol) {
            Some(entry) if tick.timestamp < entry.tick.timestamp => {
                debug!(
                    symbol = %tick.symbol,
                    stored = %entry.tick.timestamp,
                    received = %tick.timestamp,
                    "dropping out-of-order tick"
                );
                PutOutcome::Stale
            }
            Some(entry) => {
                entry.tick = tick;
                entry.refreshed_at = now;
                PutOutcome::Stored
            }
            None => {
                entries.insert(
                    tick.symbol.clone(),
                    Entry {
                        tick,
                        refreshed_at: now,
                    },
                );
                PutOutcome::Stored
            }
        }
    }

    /// Latest unexpired tick for `symbol`.
    pub fn get(&self, symbol: &Symbol) -> Option<PriceTick> {
        self.get_at(symbol, Instant::now())
    }

    fn get_at(&self, symbol: &Symbol, now: Instant) -> Option<PriceTick> {
        self.entries
            .read()
            .get(symbol)
            .filter(|entry| now.saturating_duration_since(entry.refreshed_at) < self.ttl)
            .map(|entry| entry.tick.clone())
    }

    /// Evict every entry not refreshed within the TTL, returning the number evicted.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.refreshed_at) < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
