use super::{BackoffPolicy, Shutdown, WorkerState, fetch::issued_since};
use crate::{
    candle::Timeframe,
    error::{IngestError, SourceError},
    instrument::Symbol,
    source::ExternalPriceSource,
    store::{TimeSeriesStore, UpsertSummary},
    subscription::Enrollment,
};
use futures::{FutureExt, StreamExt, stream};
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Default [`CandleConfig::interval`].
pub const DEFAULT_CANDLE_INTERVAL: Duration = Duration::from_secs(60);

/// Default [`CandleConfig::lookback`].
pub const DEFAULT_CANDLE_LOOKBACK: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CandleConfig {
    pub interval: Duration,
    pub timeframe: Timeframe,
    /// How far back each fetch reaches.
    pub lookback: Duration,
    /// Maximum in-flight symbol fetches per cycle.
    pub concurrency: usize,
    pub request_timeout: Duration,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CANDLE_INTERVAL,
            timeframe: Timeframe::OneMinute,
            lookback: DEFAULT_CANDLE_LOOKBACK,
            concurrency: 4,
            request_timeout: super::fetch::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Summary of one [`CandleIngestWorker`] cycle.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct CandleCycle {
    pub symbols: usize,
    pub inserted: usize,
    pub replaced: usize,
    /// Bars skipped for failing validation, their symbols still count as ingested.
    pub invalid: usize,
    pub failures: usize,
    pub next_delay: Duration,
}

/// Recurring pull of recent OHLCV windows for every enrolled symbol, upserted into the
/// [`TimeSeriesStore`].
///
/// Upserts replace on conflict, so re-fetching closed bars is idempotent and only the
/// still-open bar changes between cycles. One symbol failing never affects the others.
#[derive(Debug)]
pub struct CandleIngestWorker<Source: ?Sized, Store: ?Sized> {
    source: Arc<Source>,
    store: Arc<Store>,
    enrollment: Enrollment,
    config: CandleConfig,
    backoff: BackoffPolicy,
    failures: u32,
    state: watch::Sender<WorkerState>,
}

impl<Source, Store> CandleIngestWorker<Source, Store>
where
    Source: ExternalPriceSource + ?Sized,
    Store: TimeSeriesStore + ?Sized,
{
    pub fn new(source: Arc<Source>, store: Arc<Store>, config: CandleConfig, backoff: BackoffPolicy) -> Self {
        Self {
            source,
            store,
            enrollment: Enrollment::new(),
            config,
            backoff,
            failures: 0,
            state: watch::Sender::new(WorkerState::Idle),
        }
    }

    pub fn enrollment(&self) -> Enrollment {
        self.enrollment.clone()
    }

    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(
            source = self.source.name(),
            interval = ?self.config.interval,
            timeframe = %self.config.timeframe,
            "CandleIngestWorker started"
        );

        loop {
            let outcome = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
            let delay = match outcome {
                Ok(cycle) => cycle.next_delay,
                Err(_) => {
                    error!("CandleIngestWorker cycle panicked, backing off");
                    self.enter_backoff(None)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait() => break,
            }
        }

        self.state.send_replace(WorkerState::Stopped);
        info!("CandleIngestWorker stopped");
    }

    pub async fn run_cycle(&mut self) -> CandleCycle {
        let symbols = self.enrollment.snapshot();
        let mut cycle = CandleCycle {
            symbols: symbols.len(),
            ..CandleCycle::default()
        };

        if symbols.is_empty() {
            self.failures = 0;
            self.state.send_replace(WorkerState::Idle);
            cycle.next_delay = self.config.interval;
            return cycle;
        }

        self.state.send_replace(WorkerState::Polling);

        let issued_before = self.source.requests_issued();
        let this = &*self;
        let results = stream::iter(symbols)
            .map(|symbol| async move {
                let result = this.ingest(&symbol).await;
                (symbol, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut transient_failures = 0;
        let mut retry_after = None;
        for (symbol, result) in results {
            match result {
                Ok(summary) => {
                    cycle.inserted += summary.inserted;
                    cycle.replaced += summary.replaced;
                    cycle.invalid += summary.invalid;
                }
                Err(error) => {
                    warn!(%symbol, %error, "candle ingest failed for symbol");
                    cycle.failures += 1;
                    if error.is_transient() {
                        transient_failures += 1;
                    }
                    if let IngestError::Source(source_error) = &error {
                        retry_after = retry_after.max(source_error.retry_after());
                    }
                }
            }
        }

        // Only back off when the provider or store looks unavailable for everyone
        cycle.next_delay = if transient_failures == cycle.symbols {
            self.enter_backoff(retry_after)
        } else {
            self.failures = 0;
            self.state.send_replace(WorkerState::Idle);
            self.config
                .interval
                .max(self.source.rate_budget().min_interval(
                    issued_since(self.source.requests_issued(), issued_before).max(cycle.symbols),
                ))
        };

        debug!(
            symbols = cycle.symbols,
            inserted = cycle.inserted,
            replaced = cycle.replaced,
            invalid = cycle.invalid,
            failures = cycle.failures,
            next_delay = ?cycle.next_delay,
            "CandleIngestWorker cycle complete"
        );

        cycle
    }

    async fn ingest(&self, symbol: &Symbol) -> Result<UpsertSummary, IngestError> {
        let bars = tokio::time::timeout(
            self.config.request_timeout,
            self.source
                .recent_bars(symbol, self.config.lookback, self.config.timeframe),
        )
        .await
        .unwrap_or(Err(SourceError::Timeout))?;

        Ok(self.store.upsert_bars(bars).await?)
    }

    fn enter_backoff(&mut self, retry_after: Option<Duration>) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self
            .backoff
            .delay(self.failures)
            .max(retry_after.unwrap_or_default());
        self.state.send_replace(WorkerState::Backoff {
            failures: self.failures,
            delay,
        });
        warn!(failures = self.failures, ?delay, "CandleIngestWorker backing off");
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        candle::test_utils::{bar, bars_from_closes},
        source::scripted::ScriptedPriceSource,
        store::InMemoryTimeSeriesStore,
        subscription::EnrollmentListener,
    };

    fn worker(
        source: &Arc<ScriptedPriceSource>,
        store: &Arc<InMemoryTimeSeriesStore>,
    ) -> CandleIngestWorker<ScriptedPriceSource, InMemoryTimeSeriesStore> {
        CandleIngestWorker::new(
            Arc::clone(source),
            Arc::clone(store),
            CandleConfig {
                interval: Duration::from_secs(60),
                timeframe: Timeframe::OneMinute,
                lookback: Duration::from_secs(600),
                concurrency: 2,
                request_timeout: Duration::from_secs(1),
            },
            BackoffPolicy {
                initial: Duration::from_secs(3),
                max: Duration::from_secs(60),
                multiplier: 2.0,
            },
        )
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent_and_replaces_open_bar() {
        let source = Arc::new(ScriptedPriceSource::new());
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        let mut worker = worker(&source, &store);
        worker.enrollment().enroll(&Symbol::new("XYZ"));

        source.set_bars(Symbol::new("XYZ"), bars_from_closes("XYZ", &[10.0, 11.0, 12.0]));
        let first = worker.run_cycle().await;
        assert_eq!((first.inserted, first.replaced), (3, 0));

        // Same closed bars plus an updated open bar
        let mut refreshed = bars_from_closes("XYZ", &[10.0, 11.0, 12.0]);
        refreshed[2] = bar("XYZ", 2, 12.5, 1.0, 4_000.0);
        source.set_bars(Symbol::new("XYZ"), refreshed);
        let second = worker.run_cycle().await;
        assert_eq!((second.inserted, second.replaced), (0, 3));

        let window = store
            .query_window(&Symbol::new("XYZ"), Timeframe::OneMinute, 10)
            .await
            .unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[2].close, 12.5);
        assert_eq!(window[2].volume, 4_000.0);
    }

    #[tokio::test]
    async fn test_symbol_failure_does_not_affect_others() {
        let source = Arc::new(ScriptedPriceSource::new());
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        let mut worker = worker(&source, &store);
        worker.enrollment().enroll(&Symbol::new("GOOD"));
        worker.enrollment().enroll(&Symbol::new("FLAKY"));

        source.set_bars(Symbol::new("GOOD"), bars_from_closes("GOOD", &[1.0, 2.0]));
        source.set_bars_error(Symbol::new("FLAKY"), SourceError::Timeout);

        let cycle = worker.run_cycle().await;
        assert_eq!(cycle.inserted, 2);
        assert_eq!(cycle.failures, 1);
        assert_eq!(cycle.next_delay, Duration::from_secs(60));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_all_symbols_failing_transiently_backs_off() {
        let source = Arc::new(ScriptedPriceSource::new());
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        let mut worker = worker(&source, &store);
        worker.enrollment().enroll(&Symbol::new("A"));
        worker.enrollment().enroll(&Symbol::new("B"));
        source.set_bars_error(Symbol::new("A"), SourceError::Timeout);
        source.set_bars_error(
            Symbol::new("B"),
            SourceError::RateLimited {
                retry_after: Some(Duration::from_secs(10)),
            },
        );

        let cycle = worker.run_cycle().await;
        assert_eq!(cycle.failures, 2);
        assert_eq!(cycle.next_delay, Duration::from_secs(10));

        let cycle = worker.run_cycle().await;
        assert_eq!(cycle.next_delay, Duration::from_secs(10));
        assert!(matches!(
            *worker.state().borrow(),
            WorkerState::Backoff { failures: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_bar_is_skipped_without_truncating_window() {
        let source = Arc::new(ScriptedPriceSource::new());
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        let mut worker = worker(&source, &store);
        worker.enrollment().enroll(&Symbol::new("BAD"));

        let mut invalid = bar("BAD", 1, 10.0, 1.0, 1.0);
        invalid.high = 1.0;
        source.set_bars(
            Symbol::new("BAD"),
            vec![bar("BAD", 0, 10.0, 1.0, 1.0), invalid, bar("BAD", 2, 12.0, 1.0, 1.0)],
        );

        let cycle = worker.run_cycle().await;
        assert_eq!((cycle.inserted, cycle.invalid, cycle.failures), (2, 1, 0));
        // Bad data is not a provider outage
        assert_eq!(cycle.next_delay, Duration::from_secs(60));

        let window = store
            .query_window(&Symbol::new("BAD"), Timeframe::OneMinute, 10)
            .await
            .unwrap();
        assert_eq!(window.last().map(|bar| bar.close), Some(12.0));
    }
}
