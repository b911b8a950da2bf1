use crate::{
    candle::{CandleBar, Timeframe},
    error::StoreError,
    instrument::Symbol,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::warn;

/// Outcome of a [`TimeSeriesStore::upsert_bar`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Upsert {
    Inserted,
    Replaced,
}

/// Durable OHLCV storage keyed by (instrument, timestamp, timeframe).
///
/// Upserts are idempotent: writing an existing key replaces the stored bar.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn upsert_bar(&self, bar: CandleBar) -> Result<Upsert, StoreError>;

    /// Most recent `limit` bars for `instrument` and `timeframe`, oldest first.
    async fn query_window(
        &self,
        instrument: &Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<CandleBar>, StoreError>;

    /// Upsert every bar in order. Invalid bars are skipped and counted so one bad bar
    /// never truncates the rest of the window; any other error stops the batch.
    async fn upsert_bars(&self, bars: Vec<CandleBar>) -> Result<UpsertSummary, StoreError> {
        let mut summary = UpsertSummary::default();
        for bar in bars {
            match self.upsert_bar(bar).await {
                Ok(Upsert::Inserted) => summary.inserted += 1,
                Ok(Upsert::Replaced) => summary.replaced += 1,
                Err(StoreError::InvalidBar { instrument, reason }) => {
                    warn!(%instrument, %reason, "skipping invalid bar");
                    summary.invalid += 1;
                }
                Err(error) => return Err(error),
            }
        }
        Ok(summary)
    }
}

impl std::fmt::Debug for dyn TimeSeriesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TimeSeriesStore")
    }
}

/// Counts of rows written by [`TimeSeriesStore::upsert_bars`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub replaced: usize,
    /// Bars skipped because they failed validation.
    pub invalid: usize,
}

/// [`TimeSeriesStore`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryTimeSeriesStore {
    series: RwLock<FnvHashMap<(Symbol, Timeframe), BTreeMap<DateTime<Utc>, CandleBar>>>,
}

impl InMemoryTimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored bars across every series.
    pub fn len(&self) -> usize {
        self.series.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TimeSeriesStore for InMemoryTimeSeriesStore {
    async fn upsert_bar(&self, bar: CandleBar) -> Result<Upsert, StoreError> {
        bar.validate().map_err(|reason| StoreError::InvalidBar {
            instrument: bar.instrument.clone(),
            reason,
        })?;

        let mut series = self.series.write();
        let replaced = series
            .entry((bar.instrument.clone(), bar.timeframe))
            .or_default()
            .insert(bar.timestamp, bar)
            .is_some();

        Ok(if replaced {
            Upsert::Replaced
        } else {
            Upsert::Inserted
        })
    }

    async fn query_window(
        &self,
        instrument: &Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<CandleBar>, StoreError> {
        let series = self.series.read();
        let Some(bars) = series.get(&(instrument.clone(), timeframe)) else {
            return Ok(Vec::new());
        };

        let mut window = bars.values().rev().take(limit).cloned().collect::<Vec<_>>();
        window.reverse();
        Ok(window)
    }
}
