use crate::{cache::PriceCache, signal::store::SignalStore, worker::Shutdown};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

/// Default [`Sweeper`] interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Entries removed by one [`Sweeper::sweep_once`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct SweepReport {
    pub ticks: usize,
    pub signals: usize,
}

/// Background pass evicting TTL-expired ticks and deactivating expired signals.
///
/// Readers already treat expired entries as absent, so sweeping only reclaims memory
/// and moves signals to history.
#[derive(Debug)]
pub struct Sweeper {
    cache: Arc<PriceCache>,
    signals: Arc<SignalStore>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(cache: Arc<PriceCache>, signals: Arc<SignalStore>, interval: Duration) -> Self {
        Self {
            cache,
            signals,
            interval,
        }
    }

    pub fn sweep_once(&self) -> SweepReport {
        let report = SweepReport {
            ticks: self.cache.sweep_expired(),
            signals: self.signals.sweep(Utc::now()),
        };
        if report != SweepReport::default() {
            debug!(ticks = report.ticks, signals = report.signals, "swept expired entries");
        }
        report
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        info!(interval = ?self.interval, "Sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Sweeper stopped");
    }
}
