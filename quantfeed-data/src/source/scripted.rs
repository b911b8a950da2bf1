use super::{ExternalPriceSource, QuoteBatch, RateBudget};
use crate::{
    candle::{CandleBar, Timeframe},
    error::SourceError,
    instrument::Symbol,
    quote::PriceTick,
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::{collections::VecDeque, time::Duration};

#[derive(Debug, Default)]
struct Script {
    quotes: FnvHashMap<Symbol, Result<PriceTick, SourceError>>,
    batch_failures: VecDeque<SourceError>,
    bars: FnvHashMap<Symbol, Result<Vec<CandleBar>, SourceError>>,
    quote_requests: Vec<Vec<Symbol>>,
    bar_requests: Vec<Symbol>,
    requests_issued: u64,
}

/// [`ExternalPriceSource`] answering from an in-memory script.
///
/// Used to drive workers deterministically in tests and local demos: quotes and bars are
/// set per symbol, batch level failures are queued and consumed one per call, and every
/// request is recorded for inspection.
#[derive(Debug)]
pub struct ScriptedPriceSource {
    script: Mutex<Script>,
    budget: RateBudget,
    latency: Duration,
    per_symbol_quotes: bool,
}

impl ScriptedPriceSource {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            budget: RateBudget::UNLIMITED,
            latency: Duration::ZERO,
            per_symbol_quotes: false,
        }
    }

    pub fn with_rate_budget(mut self, budget: RateBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Count one provider request per symbol on every quote batch, as a provider without
    /// a batch endpoint would issue.
    pub fn with_per_symbol_quotes(mut self) -> Self {
        self.per_symbol_quotes = true;
        self
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer subsequent quote requests for the tick's symbol with `tick`.
    pub fn set_quote(&self, tick: PriceTick) {
        self.script.lock().quotes.insert(tick.symbol.clone(), Ok(tick));
    }

    /// Answer subsequent quote requests for `symbol` with a per-symbol error.
    pub fn set_quote_error(&self, symbol: Symbol, error: SourceError) {
        self.script.lock().quotes.insert(symbol, Err(error));
    }

    /// Fail the next quote request as a whole.
    pub fn push_batch_failure(&self, error: SourceError) {
        self.script.lock().batch_failures.push_back(error);
    }

    pub fn set_bars(&self, symbol: Symbol, bars: Vec<CandleBar>) {
        self.script.lock().bars.insert(symbol, Ok(bars));
    }

    pub fn set_bars_error(&self, symbol: Symbol, error: SourceError) {
        self.script.lock().bars.insert(symbol, Err(error));
    }

    /// Every symbol batch passed to [`ExternalPriceSource::live_quotes`], in call order.
    pub fn quote_requests(&self) -> Vec<Vec<Symbol>> {
        self.script.lock().quote_requests.clone()
    }

    /// Every symbol passed to [`ExternalPriceSource::recent_bars`], in call order.
    pub fn bar_requests(&self) -> Vec<Symbol> {
        self.script.lock().bar_requests.clone()
    }
}

impl Default for ScriptedPriceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExternalPriceSource for ScriptedPriceSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn rate_budget(&self) -> RateBudget {
        self.budget
    }

    fn requests_issued(&self) -> u64 {
        self.script.lock().requests_issued
    }

    async fn live_quotes(&self, symbols: &[Symbol]) -> Result<QuoteBatch, SourceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut script = self.script.lock();
        script.quote_requests.push(symbols.to_vec());
        script.requests_issued += if self.per_symbol_quotes { symbols.len() as u64 } else { 1 };

        if let Some(error) = script.batch_failures.pop_front() {
            return Err(error);
        }

        Ok(symbols
            .iter()
            .map(|symbol| {
                let result = script
                    .quotes
                    .get(symbol)
                    .cloned()
                    .unwrap_or_else(|| Err(SourceError::MissingQuote(symbol.clone())));
                (symbol.clone(), result)
            })
            .collect())
    }

    async fn recent_bars(
        &self,
        symbol: &Symbol,
        _: Duration,
        interval: Timeframe,
    ) -> Result<Vec<CandleBar>, SourceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut script = self.script.lock();
        script.bar_requests.push(symbol.clone());
        script.requests_issued += 1;

        match script.bars.get(symbol) {
            Some(Ok(bars)) => Ok(bars
                .iter()
                .filter(|bar| bar.timeframe == interval)
                .cloned()
                .collect()),
            Some(Err(error)) => Err(error.clone()),
            None => Ok(Vec::new()),
        }
    }
}
