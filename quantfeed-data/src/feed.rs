use crate::{
    cache::PriceCache,
    config::FeedConfig,
    error::ConfigError,
    event::FeedEvent,
    pipeline::SignalPipeline,
    signal::{SignalGenerator, store::SignalStore},
    source::ExternalPriceSource,
    store::TimeSeriesStore,
    subscription::{EnrollmentListener, SubscriptionRegistry},
    sweeper::Sweeper,
    worker::{
        ShutdownTrigger, WorkerState, candle::CandleIngestWorker, fetch::FetchWorker,
        shutdown_channel,
    },
};
use std::sync::Arc;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{info, warn};

/// Running feed: shared state plus the background loops that maintain it.
///
/// Built once at process start by [`Feed::spawn`] and handed by reference to every
/// connection task. Dropping it without [`Feed::shutdown`] leaves the loops running
/// until the runtime stops.
#[derive(Debug)]
pub struct Feed {
    pub cache: Arc<PriceCache>,
    pub store: Arc<dyn TimeSeriesStore>,
    pub signals: Arc<SignalStore>,
    pub registry: Arc<SubscriptionRegistry>,
    events: broadcast::Sender<FeedEvent>,
    fetch_state: watch::Receiver<WorkerState>,
    candle_state: watch::Receiver<WorkerState>,
    shutdown: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl Feed {
    /// Validate `config`, wire the registry to both workers, and spawn the fetch,
    /// candle, signal and sweep loops onto the current tokio runtime.
    pub fn spawn(
        source: Arc<dyn ExternalPriceSource>,
        store: Arc<dyn TimeSeriesStore>,
        config: FeedConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = Arc::new(PriceCache::new(config.cache_ttl));
        let signals = Arc::new(SignalStore::new(config.signal_history));
        let (events, _) = broadcast::channel(config.event_buffer_size);
        let (shutdown, shutdown_rx) = shutdown_channel();

        let fetch = FetchWorker::new(
            Arc::clone(&source),
            Arc::clone(&cache),
            events.clone(),
            config.fetch,
            config.backoff,
        );
        let candle = CandleIngestWorker::new(
            Arc::clone(&source),
            Arc::clone(&store),
            config.candle,
            config.backoff,
        );

        let registry = Arc::new(SubscriptionRegistry::new(vec![
            Arc::new(fetch.enrollment()) as Arc<dyn EnrollmentListener>,
            Arc::new(candle.enrollment()),
        ]));

        let fetch_state = fetch.state();
        let candle_state = candle.state();

        let pipeline = SignalPipeline::new(
            Arc::clone(&store),
            Arc::clone(&signals),
            SignalGenerator::new(config.signal.clone()),
            events.clone(),
            config.pipeline,
        );
        let sweeper = Sweeper::new(Arc::clone(&cache), Arc::clone(&signals), config.sweep_interval);

        let tasks = vec![
            tokio::spawn(fetch.run(shutdown_rx.clone())),
            tokio::spawn(candle.run(shutdown_rx.clone())),
            tokio::spawn(pipeline.run(events.subscribe(), shutdown_rx.clone())),
            tokio::spawn(sweeper.run(shutdown_rx)),
        ];

        info!(source = source.name(), "feed started");

        Ok(Self {
            cache,
            store,
            signals,
            registry,
            events,
            fetch_state,
            candle_state,
            shutdown,
            tasks,
        })
    }

    /// New receiver of every [`FeedEvent`] published from now on.
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    pub fn fetch_state(&self) -> watch::Receiver<WorkerState> {
        self.fetch_state.clone()
    }

    pub fn candle_state(&self) -> watch::Receiver<WorkerState> {
        self.candle_state.clone()
    }

    /// Signal every loop to stop and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(error) = task.await {
                warn!(%error, "feed task ended abnormally");
            }
        }
        info!("feed stopped");
    }
}
