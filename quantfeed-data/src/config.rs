use crate::{
    cache::DEFAULT_CACHE_TTL,
    candle::Timeframe,
    error::ConfigError,
    pipeline::PipelineConfig,
    signal::{SignalConfig, store::DEFAULT_SIGNAL_HISTORY},
    sweeper::DEFAULT_SWEEP_INTERVAL,
    worker::{BackoffPolicy, candle::CandleConfig, fetch::FetchConfig},
};
use std::{str::FromStr, time::Duration};

/// Default [`FeedConfig::event_buffer_size`].
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 10_000;

/// Prefix shared by every environment variable read by [`FeedConfig::from_env`].
pub const ENV_PREFIX: &str = "QUANTFEED_";

/// Configuration of every background loop of a [`Feed`](crate::feed::Feed).
#[derive(Clone, PartialEq, Debug)]
pub struct FeedConfig {
    pub fetch: FetchConfig,
    pub candle: CandleConfig,
    pub backoff: BackoffPolicy,
    pub cache_ttl: Duration,
    pub signal: SignalConfig,
    pub pipeline: PipelineConfig,
    pub sweep_interval: Duration,
    /// Capacity of the [`FeedEvent`](crate::event::FeedEvent) broadcast channel.
    pub event_buffer_size: usize,
    pub signal_history: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            candle: CandleConfig::default(),
            backoff: BackoffPolicy::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            signal: SignalConfig::default(),
            pipeline: PipelineConfig::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            signal_history: DEFAULT_SIGNAL_HISTORY,
        }
    }
}

impl FeedConfig {
    pub fn with_fetch_interval(mut self, interval: Duration) -> Self {
        self.fetch.interval = interval;
        self
    }

    pub fn with_candle_interval(mut self, interval: Duration) -> Self {
        self.candle.interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_signal(mut self, signal: SignalConfig) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Defaults overridden by `QUANTFEED_*` environment variables, then validated.
    ///
    /// Durations are whole seconds, eg/ `QUANTFEED_FETCH_INTERVAL_SECS=5`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// As [`FeedConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        env.secs("FETCH_INTERVAL_SECS", &mut config.fetch.interval)?;
        env.parse("FETCH_BATCH_SIZE", &mut config.fetch.batch_size)?;
        env.secs("REQUEST_TIMEOUT_SECS", &mut config.fetch.request_timeout)?;
        config.candle.request_timeout = config.fetch.request_timeout;

        env.secs("CANDLE_INTERVAL_SECS", &mut config.candle.interval)?;
        env.parse::<Timeframe>("CANDLE_TIMEFRAME", &mut config.candle.timeframe)?;
        config.pipeline.timeframe = config.candle.timeframe;
        env.secs("CANDLE_LOOKBACK_SECS", &mut config.candle.lookback)?;
        env.parse("CANDLE_CONCURRENCY", &mut config.candle.concurrency)?;

        env.secs("BACKOFF_INITIAL_SECS", &mut config.backoff.initial)?;
        env.secs("BACKOFF_MAX_SECS", &mut config.backoff.max)?;

        env.secs("CACHE_TTL_SECS", &mut config.cache_ttl)?;

        env.secs("SIGNAL_TTL_SECS", &mut config.signal.ttl)?;
        env.parse("SIGNAL_MIN_CONFIDENCE", &mut config.signal.min_confidence)?;
        env.secs("SIGNAL_COOLDOWN_SECS", &mut config.pipeline.cooldown)?;

        env.secs("SWEEP_INTERVAL_SECS", &mut config.sweep_interval)?;
        env.parse("EVENT_BUFFER_SIZE", &mut config.event_buffer_size)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("fetch interval", self.fetch.interval),
            ("request timeout", self.fetch.request_timeout),
            ("candle interval", self.candle.interval),
            ("candle lookback", self.candle.lookback),
            ("cache ttl", self.cache_ttl),
            ("sweep interval", self.sweep_interval),
            ("backoff initial delay", self.backoff.initial),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, duration)| duration.is_zero()) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.backoff.max < self.backoff.initial {
            return Err(ConfigError::Invalid("backoff max delay below initial delay".into()));
        }
        if !(self.backoff.multiplier.is_finite() && self.backoff.multiplier >= 1.0) {
            return Err(ConfigError::Invalid("backoff multiplier must be at least 1".into()));
        }
        if self.fetch.batch_size == 0 {
            return Err(ConfigError::Invalid("fetch batch size must be at least 1".into()));
        }
        if self.candle.concurrency == 0 {
            return Err(ConfigError::Invalid("candle concurrency must be at least 1".into()));
        }
        if self.pipeline.window == 0 {
            return Err(ConfigError::Invalid("pipeline window must be at least 1".into()));
        }
        if self.event_buffer_size == 0 {
            return Err(ConfigError::Invalid("event buffer size must be at least 1".into()));
        }
        self.signal.validate()
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, name: &str, target: &mut T) -> Result<(), ConfigError> {
        let key = format!("{ENV_PREFIX}{name}");
        let Some(value) = (self.lookup)(&key) else {
            return Ok(());
        };
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { key, value })?;
        Ok(())
    }

    fn secs(&self, name: &str, target: &mut Duration) -> Result<(), ConfigError> {
        let mut secs = target.as_secs();
        self.parse(name, &mut secs)?;
        *target = Duration::from_secs(secs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        assert_eq!(FeedConfig::default().validate(), Ok(()));
        assert_eq!(FeedConfig::from_lookup(|_| None), Ok(FeedConfig::default()));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = FeedConfig::from_lookup(lookup(&[
            ("QUANTFEED_FETCH_INTERVAL_SECS", "2"),
            ("QUANTFEED_FETCH_BATCH_SIZE", " 10 "),
            ("QUANTFEED_CANDLE_TIMEFRAME", "5m"),
            ("QUANTFEED_SIGNAL_MIN_CONFIDENCE", "0.7"),
        ]))
        .unwrap();

        assert_eq!(config.fetch.interval, Duration::from_secs(2));
        assert_eq!(config.fetch.batch_size, 10);
        assert_eq!(config.candle.timeframe, Timeframe::FiveMinutes);
        assert_eq!(config.pipeline.timeframe, Timeframe::FiveMinutes);
        assert_eq!(config.signal.min_confidence, 0.7);
    }

    #[test]
    fn test_from_lookup_rejects() {
        struct TestCase {
            vars: Vec<(&'static str, &'static str)>,
            expected: ConfigError,
        }

        let tests = vec![
            TestCase {
                // TC0: unparsable number
                vars: vec![("QUANTFEED_FETCH_BATCH_SIZE", "many")],
                expected: ConfigError::InvalidEnv {
                    key: "QUANTFEED_FETCH_BATCH_SIZE".to_string(),
                    value: "many".to_string(),
                },
            },
            TestCase {
                // TC1: unknown timeframe
                vars: vec![("QUANTFEED_CANDLE_TIMEFRAME", "2m")],
                expected: ConfigError::InvalidEnv {
                    key: "QUANTFEED_CANDLE_TIMEFRAME".to_string(),
                    value: "2m".to_string(),
                },
            },
            TestCase {
                // TC2: zero batch size parses but is invalid
                vars: vec![("QUANTFEED_FETCH_BATCH_SIZE", "0")],
                expected: ConfigError::Invalid("fetch batch size must be at least 1".to_string()),
            },
            TestCase {
                // TC3: zero signal ttl
                vars: vec![("QUANTFEED_SIGNAL_TTL_SECS", "0")],
                expected: ConfigError::Invalid("signal ttl must be positive".to_string()),
            },
            TestCase {
                // TC4: zero fetch interval
                vars: vec![("QUANTFEED_FETCH_INTERVAL_SECS", "0")],
                expected: ConfigError::Invalid("fetch interval must be positive".to_string()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = FeedConfig::from_lookup(lookup(&test.vars));
            assert_eq!(actual, Err(test.expected), "TC{} failed", index);
        }
    }
}
