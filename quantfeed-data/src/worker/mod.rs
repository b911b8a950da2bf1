use std::time::Duration;
use tokio::sync::watch;

/// Candle ingestion loop.
pub mod candle;

/// Live quote polling loop.
pub mod fetch;

/// Default initial [`BackoffPolicy`] delay.
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(2);

/// Default maximum [`BackoffPolicy`] delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(120);

/// Observable lifecycle of a background worker.
///
/// `Idle → Polling → (Idle | Backoff) → Polling → ...`, and `Stopped` once shut down.
#[derive(Clone, PartialEq, Debug)]
pub enum WorkerState {
    Idle,
    Polling,
    Backoff { failures: u32, delay: Duration },
    Stopped,
}

/// Exponential backoff applied to a whole worker after a failed cycle.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_BACKOFF_INITIAL,
            max: DEFAULT_BACKOFF_MAX,
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next cycle after `failures` consecutive failed cycles.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Receiving half of the process shutdown signal shared by every background loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending half of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is triggered or the trigger is dropped.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
