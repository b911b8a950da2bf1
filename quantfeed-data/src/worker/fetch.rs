use super::{BackoffPolicy, Shutdown, WorkerState};
use crate::{
    cache::{PriceCache, PutOutcome},
    error::SourceError,
    event::FeedEvent,
    quote::PriceTick,
    source::ExternalPriceSource,
    subscription::Enrollment,
};
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Default [`FetchConfig::interval`].
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(5);

/// Default [`FetchConfig::batch_size`].
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 50;

/// Default [`FetchConfig::request_timeout`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FetchConfig {
    /// Target period between cycles, raised to respect the provider's rate budget.
    pub interval: Duration,
    /// Symbols per provider call.
    pub batch_size: usize,
    /// Upper bound on each provider call.
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_FETCH_INTERVAL,
            batch_size: DEFAULT_FETCH_BATCH_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Summary of one [`FetchWorker`] cycle.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct FetchCycle {
    pub symbols: usize,
    pub batches: usize,
    /// Provider requests issued while the cycle ran, at least one per batch.
    pub requests: usize,
    pub published: usize,
    pub stale: usize,
    pub symbol_failures: usize,
    pub batch_failures: usize,
    /// Delay before the next cycle starts.
    pub next_delay: Duration,
}

/// Recurring batched poll over every enrolled symbol.
///
/// Each cycle snapshots the [`Enrollment`], calls the provider once per batch, writes
/// accepted ticks into the [`PriceCache`] and publishes a [`FeedEvent::Price`] for each.
/// A failed symbol is skipped for the cycle; a failed batch puts the whole worker into
/// backoff.
#[derive(Debug)]
pub struct FetchWorker<Source: ?Sized> {
    source: Arc<Source>,
    cache: Arc<PriceCache>,
    enrollment: Enrollment,
    events: broadcast::Sender<FeedEvent>,
    config: FetchConfig,
    backoff: BackoffPolicy,
    failures: u32,
    state: watch::Sender<WorkerState>,
}

impl<Source> FetchWorker<Source>
where
    Source: ExternalPriceSource + ?Sized,
{
    pub fn new(
        source: Arc<Source>,
        cache: Arc<PriceCache>,
        events: broadcast::Sender<FeedEvent>,
        config: FetchConfig,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            source,
            cache,
            enrollment: Enrollment::new(),
            events,
            config,
            backoff,
            failures: 0,
            state: watch::Sender::new(WorkerState::Idle),
        }
    }

    /// Handle the [`SubscriptionRegistry`](crate::subscription::SubscriptionRegistry) uses to
    /// enroll and retire symbols.
    pub fn enrollment(&self) -> Enrollment {
        self.enrollment.clone()
    }

    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Poll until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(
            source = self.source.name(),
            interval = ?self.config.interval,
            batch_size = self.config.batch_size,
            "FetchWorker started"
        );

        loop {
            let outcome = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
            let delay = match outcome {
                Ok(cycle) => cycle.next_delay,
                Err(_) => {
                    error!("FetchWorker cycle panicked, backing off");
                    self.enter_backoff(None)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait() => break,
            }
        }

        self.state.send_replace(WorkerState::Stopped);
        info!("FetchWorker stopped");
    }

    /// Execute a single poll cycle.
    pub async fn run_cycle(&mut self) -> FetchCycle {
        let symbols = self.enrollment.snapshot();
        let mut cycle = FetchCycle {
            symbols: symbols.len(),
            ..FetchCycle::default()
        };

        if symbols.is_empty() {
            self.failures = 0;
            self.state.send_replace(WorkerState::Idle);
            cycle.next_delay = self.config.interval;
            return cycle;
        }

        self.state.send_replace(WorkerState::Polling);
        let batch_size = self.config.batch_size.max(1);
        let issued_before = self.source.requests_issued();
        let mut last_failure = None;

        for batch in symbols.chunks(batch_size) {
            cycle.batches += 1;
            let result = tokio::time::timeout(self.config.request_timeout, self.source.live_quotes(batch))
                .await
                .unwrap_or(Err(SourceError::Timeout));

            match result {
                Ok(mut quotes) => {
                    for symbol in batch {
                        match quotes.remove(symbol) {
                            Some(Ok(tick)) => self.accept(tick, &mut cycle),
                            Some(Err(error)) => {
                                warn!(%symbol, %error, "skipping symbol this cycle");
                                cycle.symbol_failures += 1;
                            }
                            None => {
                                warn!(%symbol, "provider omitted symbol from batch response");
                                cycle.symbol_failures += 1;
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(%error, batch = batch.len(), "quote batch failed");
                    cycle.batch_failures += 1;
                    let transient = error.is_transient();
                    last_failure = Some(error);
                    // Remaining batches would hit the same throttled or unreachable provider
                    if transient {
                        break;
                    }
                }
            }
        }

        cycle.requests = issued_since(self.source.requests_issued(), issued_before).max(cycle.batches);
        cycle.next_delay = match last_failure {
            Some(error) => self.enter_backoff(error.retry_after()),
            None => {
                self.failures = 0;
                self.state.send_replace(WorkerState::Idle);
                self.config
                    .interval
                    .max(self.source.rate_budget().min_interval(cycle.requests))
            }
        };

        debug!(
            symbols = cycle.symbols,
            batches = cycle.batches,
            requests = cycle.requests,
            published = cycle.published,
            stale = cycle.stale,
            symbol_failures = cycle.symbol_failures,
            batch_failures = cycle.batch_failures,
            next_delay = ?cycle.next_delay,
            "FetchWorker cycle complete"
        );

        cycle
    }

    fn accept(&self, tick: PriceTick, cycle: &mut FetchCycle) {
        if let Err(reason) = tick.validate() {
            warn!(symbol = %tick.symbol, %reason, "skipping invalid tick");
            cycle.symbol_failures += 1;
            return;
        }

        match self.cache.put(tick.clone()) {
            PutOutcome::Stored => {
                cycle.published += 1;
                // No receivers is fine, nobody downstream is listening yet
                let _ = self.events.send(FeedEvent::Price(tick));
            }
            PutOutcome::Stale => cycle.stale += 1,
        }
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
        warn!(failures = self.failures, ?delay, "FetchWorker backing off");
        delay
    }
}

/// Requests issued between two readings of [`ExternalPriceSource::requests_issued`].
pub(crate) fn issued_since(now: u64, before: u64) -> usize {
    usize::try_from(now.saturating_sub(before)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instrument::Symbol,
        quote::test_utils::tick,
        source::{RateBudget, scripted::ScriptedPriceSource},
        subscription::EnrollmentListener,
        worker::shutdown_channel,
    };

    struct Harness {
        source: Arc<ScriptedPriceSource>,
        cache: Arc<PriceCache>,
        events: broadcast::Receiver<FeedEvent>,
        worker: FetchWorker<ScriptedPriceSource>,
    }

    fn harness(source: ScriptedPriceSource, config: FetchConfig) -> Harness {
        let source = Arc::new(source);
        let cache = Arc::new(PriceCache::default());
        let (tx, events) = broadcast::channel(64);
        let worker = FetchWorker::new(
            Arc::clone(&source),
            Arc::clone(&cache),
            tx,
            config,
            BackoffPolicy {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(8),
                multiplier: 2.0,
            },
        );
        Harness {
            source,
            cache,
            events,
            worker,
        }
    }

    fn config(batch_size: usize) -> FetchConfig {
        FetchConfig {
            interval: Duration::from_secs(5),
            batch_size,
            request_timeout: Duration::from_secs(1),
        }
    }

    fn drain(events: &mut broadcast::Receiver<FeedEvent>) -> Vec<FeedEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_cycle_writes_cache_and_publishes_ticks() {
        let mut h = harness(ScriptedPriceSource::new(), config(10));
        h.source.set_quote(tick("ABC", 50.0, 100));
        h.source.set_quote(tick("XYZ", 100.0, 100));
        h.worker.enrollment().enroll(&Symbol::new("ABC"));
        h.worker.enrollment().enroll(&Symbol::new("XYZ"));

        let cycle = h.worker.run_cycle().await;
        assert_eq!(cycle.published, 2);
        assert_eq!(cycle.next_delay, Duration::from_secs(5));
        assert_eq!(h.cache.get(&Symbol::new("XYZ")).unwrap().price, 100.0);
        assert_eq!(
            drain(&mut h.events),
            vec![
                FeedEvent::Price(tick("ABC", 50.0, 100)),
                FeedEvent::Price(tick("XYZ", 100.0, 100)),
            ]
        );
        assert_eq!(*h.worker.state().borrow(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_symbols_are_partitioned_into_batches() {
        let mut h = harness(ScriptedPriceSource::new(), config(2));
        for symbol in ["A", "B", "C", "D", "E"] {
            h.worker.enrollment().enroll(&Symbol::new(symbol));
        }

        let cycle = h.worker.run_cycle().await;
        assert_eq!(cycle.batches, 3);
        let requests = h
            .source
            .quote_requests()
            .into_iter()
            .map(|batch| batch.iter().map(Symbol::to_string).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(
            requests,
            vec![vec!["A", "B"], vec!["C", "D"], vec!["E"]]
        );
    }

    #[tokio::test]
    async fn test_symbol_failure_is_isolated_to_that_symbol() {
        let mut h = harness(ScriptedPriceSource::new(), config(10));
        h.source.set_quote(tick("ABC", 50.0, 100));
        h.source.set_quote_error(
            Symbol::new("BAD"),
            SourceError::InvalidQuote {
                symbol: Symbol::new("BAD"),
                reason: "no price".to_string(),
            },
        );
        h.worker.enrollment().enroll(&Symbol::new("ABC"));
        h.worker.enrollment().enroll(&Symbol::new("BAD"));
        h.worker.enrollment().enroll(&Symbol::new("MISSING"));

        let cycle = h.worker.run_cycle().await;
        assert_eq!(cycle.published, 1);
        assert_eq!(cycle.symbol_failures, 2);
        assert_eq!(cycle.batch_failures, 0);
        assert_eq!(cycle.next_delay, Duration::from_secs(5));
        assert!(h.cache.get(&Symbol::new("BAD")).is_none());
        assert_eq!(drain(&mut h.events).len(), 1);
    }

    #[tokio::test]
    async fn test_stale_tick_is_not_published() {
        let mut h = harness(ScriptedPriceSource::new(), config(10));
        h.cache.put(tick("XYZ", 100.0, 200));
        h.source.set_quote(tick("XYZ", 99.0, 150));
        h.worker.enrollment().enroll(&Symbol::new("XYZ"));

        let cycle = h.worker.run_cycle().await;
        assert_eq!(cycle.published, 0);
        assert_eq!(cycle.stale, 1);
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.cache.get(&Symbol::new("XYZ")).unwrap().price, 100.0);
    }

    #[tokio::test]
    async fn test_batch_failures_back_off_exponentially_then_reset() {
        let mut h = harness(ScriptedPriceSource::new(), config(10));
        h.source.set_quote(tick("XYZ", 100.0, 100));
        h.source.push_batch_failure(SourceError::Http("502".to_string()));
        h.source.push_batch_failure(SourceError::Http("502".to_string()));
        h.worker.enrollment().enroll(&Symbol::new("XYZ"));

        let first = h.worker.run_cycle().await;
        assert_eq!(first.batch_failures, 1);
        assert_eq!(first.next_delay, Duration::from_secs(1));

        let second = h.worker.run_cycle().await;
        assert_eq!(second.next_delay, Duration::from_secs(2));
        assert_eq!(
            *h.worker.state().borrow(),
            WorkerState::Backoff {
                failures: 2,
                delay: Duration::from_secs(2)
            }
        );

        let third = h.worker.run_cycle().await;
        assert_eq!(third.published, 1);
        assert_eq!(third.next_delay, Duration::from_secs(5));
        assert_eq!(*h.worker.state().borrow(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_rate_limit_aborts_cycle_and_honours_retry_after() {
        let mut h = harness(ScriptedPriceSource::new(), config(1));
        h.source.push_batch_failure(SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        });
        h.worker.enrollment().enroll(&Symbol::new("A"));
        h.worker.enrollment().enroll(&Symbol::new("B"));

        let cycle = h.worker.run_cycle().await;
        assert_eq!(cycle.batches, 1);
        assert_eq!(h.source.quote_requests().len(), 1);
        assert_eq!(cycle.next_delay, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_triggers_backoff() {
        let mut h = harness(
            ScriptedPriceSource::new().with_latency(Duration::from_secs(5)),
            config(10),
        );
        h.source.set_quote(tick("XYZ", 100.0, 100));
        h.worker.enrollment().enroll(&Symbol::new("XYZ"));

        let cycle = h.worker.run_cycle().await;
        assert_eq!(cycle.batch_failures, 1);
        assert_eq!(cycle.published, 0);
        assert_eq!(cycle.next_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rate_budget_bounds_interval_from_below() {
        let source = ScriptedPriceSource::new().with_rate_budget(RateBudget {
            max_requests: 1,
            per: Duration::from_secs(10),
        });
        let mut h = harness(source, config(1));
        h.worker.enrollment().enroll(&Symbol::new("A"));
        h.worker.enrollment().enroll(&Symbol::new("B"));

        let cycle = h.worker.run_cycle().await;
        assert_eq!(cycle.next_delay, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_rate_budget_counts_every_request_issued() {
        let source = ScriptedPriceSource::new()
            .with_per_symbol_quotes()
            .with_rate_budget(RateBudget {
                max_requests: 1,
                per: Duration::from_secs(10),
            });
        let mut h = harness(source, config(10));
        for symbol in ["A", "B", "C"] {
            h.worker.enrollment().enroll(&Symbol::new(symbol));
        }

        let cycle = h.worker.run_cycle().await;
        assert_eq!((cycle.batches, cycle.requests), (1, 3));
        assert_eq!(cycle.next_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retired_symbol_is_not_polled_next_cycle() {
        let mut h = harness(ScriptedPriceSource::new(), config(10));
        let enrollment = h.worker.enrollment();
        enrollment.enroll(&Symbol::new("XYZ"));
        h.worker.run_cycle().await;

        enrollment.retire(&Symbol::new("XYZ"));
        let cycle = h.worker.run_cycle().await;
        assert_eq!(cycle.symbols, 0);
        assert_eq!(h.source.quote_requests().len(), 1);
        assert_eq!(*h.worker.state().borrow(), WorkerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_until_shutdown() {
        let h = harness(ScriptedPriceSource::new(), config(10));
        h.source.set_quote(tick("XYZ", 100.0, 100));
        h.worker.enrollment().enroll(&Symbol::new("XYZ"));
        let state = h.worker.state();

        let (trigger, shutdown) = shutdown_channel();
        let handle = tokio::spawn(h.worker.run(shutdown));

        tokio::time::sleep(Duration::from_secs(12)).await;
        trigger.trigger();
        handle.await.unwrap();

        // Cycles at t=0, 5 and 10
        assert_eq!(h.source.quote_requests().len(), 3);
        assert_eq!(*state.borrow(), WorkerState::Stopped);
    }
}
