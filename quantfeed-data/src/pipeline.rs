use crate::{
    candle::Timeframe,
    event::FeedEvent,
    indicator::IndicatorEngine,
    instrument::Symbol,
    quote::PriceTick,
    signal::{Signal, SignalGenerator, store::SignalStore},
    store::TimeSeriesStore,
    worker::Shutdown,
};
use chrono::Utc;
use fnv::FnvHashMap;
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, error, info, warn};

/// Default [`PipelineConfig::cooldown`].
pub const DEFAULT_SIGNAL_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PipelineConfig {
    /// Timeframe of the bar window fed to the [`IndicatorEngine`].
    pub timeframe: Timeframe,
    /// Number of most recent bars fed to the [`IndicatorEngine`].
    pub window: usize,
    /// Minimum time between two evaluations of the same symbol.
    pub cooldown: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::OneMinute,
            window: IndicatorEngine::MAX_WINDOW,
            cooldown: DEFAULT_SIGNAL_COOLDOWN,
        }
    }
}

/// Turns price events into stored and published [`Signal`]s.
///
/// For each price event, at most once per cooldown per symbol: query the bar window,
/// compute indicators, evaluate, then store and publish any resulting signal.
#[derive(Debug)]
pub struct SignalPipeline<Store: ?Sized> {
    store: Arc<Store>,
    signals: Arc<SignalStore>,
    generator: SignalGenerator,
    events: broadcast::Sender<FeedEvent>,
    config: PipelineConfig,
    last_evaluated: FnvHashMap<Symbol, Instant>,
}

impl<Store> SignalPipeline<Store>
where
    Store: TimeSeriesStore + ?Sized,
{
    pub fn new(
        store: Arc<Store>,
        signals: Arc<SignalStore>,
        generator: SignalGenerator,
        events: broadcast::Sender<FeedEvent>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            signals,
            generator,
            events,
            config,
            last_evaluated: FnvHashMap::default(),
        }
    }

    pub async fn run(mut self, mut feed: broadcast::Receiver<FeedEvent>, mut shutdown: Shutdown) {
        info!(strategy = %self.generator.config().strategy, "SignalPipeline started");

        loop {
            let event = tokio::select! {
                event = feed.recv() => event,
                _ = shutdown.wait() => break,
            };

            match event {
                Ok(FeedEvent::Price(tick)) => {
                    let outcome = AssertUnwindSafe(self.on_tick(&tick)).catch_unwind().await;
                    if outcome.is_err() {
                        error!(symbol = %tick.symbol, "SignalPipeline evaluation panicked");
                    }
                }
                Ok(FeedEvent::Signal(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SignalPipeline lagged behind price events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("SignalPipeline stopped");
    }

    /// Evaluate `tick`'s symbol unless it was evaluated within the cooldown.
    pub async fn on_tick(&mut self, tick: &PriceTick) -> Option<Signal> {
        let now = Instant::now();
        if let Some(last) = self.last_evaluated.get(&tick.symbol) {
            if now.saturating_duration_since(*last) < self.config.cooldown {
                return None;
            }
        }
        self.last_evaluated.insert(tick.symbol.clone(), now);
        self.forget_cooled(now);

        let window = match self
            .store
            .query_window(&tick.symbol, self.config.timeframe, self.config.window)
            .await
        {
            Ok(window) => window,
            Err(error) => {
                warn!(symbol = %tick.symbol, %error, "failed to query bar window");
                return None;
            }
        };

        let snapshot = IndicatorEngine::compute(&tick.symbol, &window);
        let signal = self
            .generator
            .evaluate(&tick.symbol, tick.price, &snapshot, Utc::now())?;

        info!(
            symbol = %signal.symbol,
            direction = %signal.direction,
            confidence = signal.confidence,
            target = signal.target_price,
            stop = signal.stop_price,
            "generated signal"
        );

        self.signals.put(signal.clone());
        if self.events.send(FeedEvent::Signal(signal.clone())).is_err() {
            debug!(symbol = %signal.symbol, "no receivers for signal event");
        }

        Some(signal)
    }

    fn forget_cooled(&mut self, now: Instant) {
        let cooldown = self.config.cooldown;
        if self.last_evaluated.len() > 1_024 {
            self.last_evaluated
                .retain(|_, last| now.saturating_duration_since(*last) < cooldown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        candle::test_utils::bar,
        quote::test_utils::tick,
        signal::{Direction, SignalConfig, SignalWeights},
        store::InMemoryTimeSeriesStore,
        worker::shutdown_channel,
    };

    /// Accelerating uptrend: price above rising averages with MACD above its signal.
    async fn seed_uptrend(store: &InMemoryTimeSeriesStore, symbol: &str) {
        let bars = (0..60)
            .map(|i| bar(symbol, i, 100.0 + 0.05 * (i * i) as f64, 1.0, 1_000.0))
            .collect();
        store.upsert_bars(bars).await.unwrap();
    }

    fn trend_generator() -> SignalGenerator {
        SignalGenerator::new(SignalConfig {
            weights: SignalWeights {
                rsi: 0.0,
                moving_average: 0.5,
                macd: 0.5,
                bollinger: 0.0,
                volume: 0.0,
            },
            ..SignalConfig::default()
        })
    }

    fn pipeline(
        store: &Arc<InMemoryTimeSeriesStore>,
        signals: &Arc<SignalStore>,
        events: &broadcast::Sender<FeedEvent>,
    ) -> SignalPipeline<InMemoryTimeSeriesStore> {
        SignalPipeline::new(
            Arc::clone(store),
            Arc::clone(signals),
            trend_generator(),
            events.clone(),
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_on_tick_stores_and_publishes_signal() {
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        seed_uptrend(&store, "XYZ").await;
        let signals = Arc::new(SignalStore::default());
        let (events, mut rx) = broadcast::channel(16);
        let mut pipeline = pipeline(&store, &signals, &events);

        let signal = pipeline.on_tick(&tick("XYZ", 300.0, 10)).await.unwrap();
        assert_eq!(signal.direction, Direction::Buy);

        assert_eq!(signals.active_for(&Symbol::new("XYZ"), Utc::now()), vec![signal.clone()]);
        assert_eq!(rx.recv().await.unwrap(), FeedEvent::Signal(signal));
    }

    #[tokio::test]
    async fn test_insufficient_history_is_hold() {
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        let signals = Arc::new(SignalStore::default());
        let (events, mut rx) = broadcast::channel(16);
        let mut pipeline = pipeline(&store, &signals, &events);

        assert_eq!(pipeline.on_tick(&tick("XYZ", 300.0, 10)).await, None);
        assert!(signals.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_limits_evaluations_per_symbol() {
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        seed_uptrend(&store, "XYZ").await;
        seed_uptrend(&store, "ABC").await;
        let signals = Arc::new(SignalStore::default());
        let (events, _rx) = broadcast::channel(16);
        let mut pipeline = pipeline(&store, &signals, &events);

        assert!(pipeline.on_tick(&tick("XYZ", 300.0, 10)).await.is_some());
        assert!(pipeline.on_tick(&tick("XYZ", 301.0, 11)).await.is_none());
        // Cooldown is per symbol
        assert!(pipeline.on_tick(&tick("ABC", 300.0, 11)).await.is_some());

        tokio::time::advance(DEFAULT_SIGNAL_COOLDOWN).await;
        assert!(pipeline.on_tick(&tick("XYZ", 302.0, 12)).await.is_some());
        assert_eq!(signals.history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_run_consumes_price_events_until_shutdown() {
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        seed_uptrend(&store, "XYZ").await;
        let signals = Arc::new(SignalStore::default());
        let (events, _) = broadcast::channel(16);
        let mut observer = events.subscribe();
        let (trigger, shutdown) = shutdown_channel();

        let task = tokio::spawn(pipeline(&store, &signals, &events).run(events.subscribe(), shutdown));

        events.send(FeedEvent::Price(tick("XYZ", 300.0, 10))).unwrap();
        assert!(matches!(observer.recv().await.unwrap(), FeedEvent::Price(_)));
        assert!(matches!(observer.recv().await.unwrap(), FeedEvent::Signal(_)));

        trigger.trigger();
        task.await.unwrap();
        assert_eq!(signals.len(), 1);
    }
}
