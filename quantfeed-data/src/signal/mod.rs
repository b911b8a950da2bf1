use crate::{
    error::ConfigError,
    indicator::{BOLLINGER_WIDTH, Indicator, IndicatorSnapshot},
    instrument::Symbol,
};
use chrono::{DateTime, TimeDelta, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::time::Duration;

/// In-memory [`Signal`] storage with at most one active signal per (symbol, strategy).
pub mod store;

/// Default [`SignalConfig::strategy`].
pub const DEFAULT_STRATEGY: &str = "technical_v1";

/// Default [`SignalConfig::ttl`].
pub const DEFAULT_SIGNAL_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[display("BUY")]
    Buy,
    #[display("SELL")]
    Sell,
    #[display("HOLD")]
    Hold,
}

/// Directional call for a symbol with confidence and exit levels.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub strategy: SmolStr,
    pub direction: Direction,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub target_price: f64,
    pub stop_price: f64,
    /// Ordered, human readable reasons behind the call.
    pub reasoning: Vec<String>,
    pub generated_at: DateTime<Utc>,
    /// Always after `generated_at`.
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Signal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Active and not yet expired at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }
}

/// Per-vote weights used by the [`SignalGenerator`].
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct SignalWeights {
    pub rsi: f64,
    pub moving_average: f64,
    pub macd: f64,
    pub bollinger: f64,
    pub volume: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            rsi: 0.2,
            moving_average: 0.2,
            macd: 0.2,
            bollinger: 0.2,
            volume: 0.2,
        }
    }
}

impl SignalWeights {
    pub fn total(&self) -> f64 {
        self.rsi + self.moving_average + self.macd + self.bollinger + self.volume
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct SignalConfig {
    pub strategy: SmolStr,
    pub weights: SignalWeights,
    /// Strength above `threshold` is a BUY, below `-threshold` a SELL.
    pub threshold: f64,
    /// Minimum share of the total weight that must come from available indicators.
    pub min_coverage: f64,
    /// Signals below this confidence are not emitted.
    pub min_confidence: f64,
    /// Target distance from price in units of volatility.
    pub target_multiplier: f64,
    /// Stop distance from price in units of volatility.
    pub stop_multiplier: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Volume ratio at or above which volume confirms the other votes.
    pub volume_confirmation: f64,
    pub ttl: Duration,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            strategy: SmolStr::new_static(DEFAULT_STRATEGY),
            weights: SignalWeights::default(),
            threshold: 0.3,
            min_coverage: 0.5,
            min_confidence: 0.5,
            target_multiplier: 2.0,
            stop_multiplier: 1.5,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_confirmation: 1.5,
            ttl: DEFAULT_SIGNAL_TTL,
        }
    }
}

impl SignalConfig {
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            self.weights.rsi,
            self.weights.moving_average,
            self.weights.macd,
            self.weights.bollinger,
            self.weights.volume,
        ];
        if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.0) || self.weights.total() <= 0.0 {
            return Err(ConfigError::Invalid("signal weights must be non-negative with a positive sum".into()));
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!("signal threshold {} not in (0, 1]", self.threshold)));
        }
        if !(0.0..=1.0).contains(&self.min_coverage) || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Invalid("signal coverage and confidence floors must be within [0, 1]".into()));
        }
        if !(self.target_multiplier > 0.0 && self.stop_multiplier > 0.0) {
            return Err(ConfigError::Invalid("signal target and stop multipliers must be positive".into()));
        }
        if self.rsi_oversold >= self.rsi_overbought {
            return Err(ConfigError::Invalid("rsi oversold level must be below overbought".into()));
        }
        if self.ttl.is_zero() || TimeDelta::from_std(self.ttl).is_err() {
            return Err(ConfigError::Invalid("signal ttl must be positive".into()));
        }
        if self.strategy.is_empty() {
            return Err(ConfigError::Invalid("signal strategy name must not be empty".into()));
        }
        Ok(())
    }
}

/// Weighted vote tally behind an evaluation.
#[derive(Clone, PartialEq, Debug, Default)]
struct Tally {
    score: f64,
    available: f64,
    reasoning: Vec<String>,
}

impl Tally {
    fn vote(&mut self, weight: f64, vote: f64, reason: Option<String>) {
        self.score += weight * vote;
        self.available += weight;
        if let Some(reason) = reason.filter(|_| weight > 0.0) {
            self.reasoning.push(reason);
        }
    }
}

/// Rule based scorer turning an [`IndicatorSnapshot`] and the current price into an
/// optional [`Signal`].
///
/// Pure: identical inputs, including the evaluation instant, give identical output.
#[derive(Clone, Debug, Default)]
pub struct SignalGenerator {
    config: SignalConfig,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Score the snapshot and return a BUY or SELL signal generated at `at`, or `None`
    /// for HOLD.
    pub fn evaluate(
        &self,
        symbol: &Symbol,
        price: f64,
        snapshot: &IndicatorSnapshot,
        at: DateTime<Utc>,
    ) -> Option<Signal> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }

        let config = &self.config;
        let weights = &config.weights;
        let mut tally = Tally::default();

        if let Some(rsi) = snapshot.get(Indicator::Rsi14) {
            let (vote, reason) = if rsi < config.rsi_oversold {
                (1.0, Some(format!("RSI oversold at {rsi:.1}")))
            } else if rsi > config.rsi_overbought {
                (-1.0, Some(format!("RSI overbought at {rsi:.1}")))
            } else {
                (0.0, None)
            };
            tally.vote(weights.rsi, vote, reason);
        }

        if let (Some(sma20), Some(sma50)) = (snapshot.get(Indicator::Sma20), snapshot.get(Indicator::Sma50)) {
            let (vote, reason) = if price > sma20 && sma20 > sma50 {
                (1.0, Some("Price above SMA20 above SMA50".to_string()))
            } else if price < sma20 && sma20 < sma50 {
                (-1.0, Some("Price below SMA20 below SMA50".to_string()))
            } else {
                (0.0, None)
            };
            tally.vote(weights.moving_average, vote, reason);
        }

        if let (Some(line), Some(signal)) = (snapshot.get(Indicator::Macd), snapshot.get(Indicator::MacdSignal)) {
            let (vote, reason) = if line > signal {
                (1.0, Some("MACD above signal line".to_string()))
            } else if line < signal {
                (-1.0, Some("MACD below signal line".to_string()))
            } else {
                (0.0, None)
            };
            tally.vote(weights.macd, vote, reason);
        }

        if let (Some(upper), Some(lower)) = (
            snapshot.get(Indicator::BollingerUpper),
            snapshot.get(Indicator::BollingerLower),
        ) {
            let (vote, reason) = if price <= lower {
                (1.0, Some("Price at or below lower Bollinger band".to_string()))
            } else if price >= upper {
                (-1.0, Some("Price at or above upper Bollinger band".to_string()))
            } else {
                (0.0, None)
            };
            tally.vote(weights.bollinger, vote, reason);
        }

        // Volume has no direction of its own, it confirms whatever the others lean to
        if let Some(ratio) = snapshot.get(Indicator::VolumeRatio) {
            let lean = if tally.score > 0.0 {
                1.0
            } else if tally.score < 0.0 {
                -1.0
            } else {
                0.0
            };
            let (vote, reason) = if ratio >= config.volume_confirmation && lean != 0.0 {
                (lean, Some(format!("Volume {ratio:.2}x average confirms move")))
            } else {
                (0.0, None)
            };
            tally.vote(weights.volume, vote, reason);
        }

        let total = weights.total();
        if tally.available <= 0.0 || total <= 0.0 {
            return None;
        }

        let strength = tally.score / tally.available;
        let coverage = tally.available / total;
        if coverage < config.min_coverage {
            return None;
        }

        let direction = if strength > config.threshold {
            Direction::Buy
        } else if strength < -config.threshold {
            Direction::Sell
        } else {
            return None;
        };

        let confidence = (strength.abs() * (0.5 + 0.5 * coverage)).clamp(0.0, 1.0);
        if confidence < config.min_confidence {
            return None;
        }

        let volatility = volatility(snapshot).filter(|volatility| volatility.is_finite() && *volatility > 0.0)?;
        let (target_price, stop_price) = match direction {
            Direction::Buy => (
                price + config.target_multiplier * volatility,
                price - config.stop_multiplier * volatility,
            ),
            _ => (
                price - config.target_multiplier * volatility,
                price + config.stop_multiplier * volatility,
            ),
        };

        let expires_at = at.checked_add_signed(TimeDelta::from_std(config.ttl).ok()?)?;
        if expires_at <= at {
            return None;
        }

        Some(Signal {
            symbol: symbol.clone(),
            strategy: config.strategy.clone(),
            direction,
            confidence,
            target_price,
            stop_price,
            reasoning: tally.reasoning,
            generated_at: at,
            expires_at,
            is_active: true,
        })
    }
}

/// ATR when available, otherwise the standard deviation implied by the Bollinger bands.
fn volatility(snapshot: &IndicatorSnapshot) -> Option<f64> {
    snapshot.get(Indicator::Atr14).or_else(|| {
        let upper = snapshot.get(Indicator::BollingerUpper)?;
        let middle = snapshot.get(Indicator::BollingerMiddle)?;
        Some((upper - middle) / BOLLINGER_WIDTH)
    })
}
