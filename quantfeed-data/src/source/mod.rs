use crate::{
    candle::{CandleBar, Timeframe},
    error::SourceError,
    instrument::Symbol,
    quote::PriceTick,
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use std::time::Duration;

/// Binance spot REST [`ExternalPriceSource`].
pub mod binance;

/// In-process [`ExternalPriceSource`] replaying scripted responses.
pub mod scripted;

/// Per-symbol outcome of a batched quote request. A symbol's `Err` only affects that symbol.
pub type QuoteBatch = FnvHashMap<Symbol, Result<PriceTick, SourceError>>;

/// Request-rate allowance published by a provider.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RateBudget {
    pub max_requests: u32,
    pub per: Duration,
}

impl RateBudget {
    pub const UNLIMITED: Self = Self {
        max_requests: u32::MAX,
        per: Duration::ZERO,
    };

    /// Shortest interval in which `requests` calls fit inside the budget.
    pub fn min_interval(&self, requests: usize) -> Duration {
        if self.max_requests == 0 {
            return self.per;
        }
        let requests = u32::try_from(requests).unwrap_or(u32::MAX);
        self.per
            .checked_mul(requests)
            .map(|total| total / self.max_requests)
            .unwrap_or(self.per)
    }
}

/// Remote quote and candle provider.
#[async_trait]
pub trait ExternalPriceSource: Send + Sync {
    /// Tag recorded on every [`PriceTick`] produced by this source.
    fn name(&self) -> &'static str;

    fn rate_budget(&self) -> RateBudget;

    /// Running total of provider requests issued, by every caller.
    ///
    /// One [`live_quotes`](Self::live_quotes) call may issue several requests, eg/ when a
    /// rejected batch is retried symbol by symbol.
    fn requests_issued(&self) -> u64;

    /// Fetch live quotes for a batch of symbols in one provider call.
    ///
    /// An `Err` is a batch level failure; per-symbol problems are reported inside the
    /// returned [`QuoteBatch`].
    async fn live_quotes(&self, symbols: &[Symbol]) -> Result<QuoteBatch, SourceError>;

    /// Fetch the bars covering the last `period` at `interval` granularity, oldest first.
    async fn recent_bars(
        &self,
        symbol: &Symbol,
        period: Duration,
        interval: Timeframe,
    ) -> Result<Vec<CandleBar>, SourceError>;
}
