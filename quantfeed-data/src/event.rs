use crate::{instrument::Symbol, quote::PriceTick, signal::Signal};

/// Update published by the feed to downstream consumers (broadcaster, signal pipeline).
///
/// Events for one symbol are published in production order by a single producer.
#[derive(Clone, PartialEq, Debug)]
pub enum FeedEvent {
    /// A tick accepted by the [`PriceCache`](crate::cache::PriceCache).
    Price(PriceTick),
    /// A newly stored active [`Signal`].
    Signal(Signal),
}

impl FeedEvent {
    pub fn symbol(&self) -> &Symbol {
        match self {
            FeedEvent::Price(tick) => &tick.symbol,
            FeedEvent::Signal(signal) => &signal.symbol,
        }
    }
}

impl From<PriceTick> for FeedEvent {
    fn from(value: PriceTick) -> Self {
        Self::Price(value)
    }
}

impl From<Signal> for FeedEvent {
    fn from(value: Signal) -> Self {
        Self::Signal(value)
    }
}
