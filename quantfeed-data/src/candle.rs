use crate::instrument::Symbol;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

/// Aggregation granularity of a [`CandleBar`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    #[display("1m")]
    OneMinute,
    #[serde(rename = "5m")]
    #[display("5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    #[display("15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    #[display("1h")]
    OneHour,
    #[serde(rename = "4h")]
    #[display("4h")]
    FourHours,
    #[serde(rename = "1d")]
    #[display("1d")]
    OneDay,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHours => "4h",
            Timeframe::OneDay => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::OneMinute => Duration::from_secs(60),
            Timeframe::FiveMinutes => Duration::from_secs(5 * 60),
            Timeframe::FifteenMinutes => Duration::from_secs(15 * 60),
            Timeframe::OneHour => Duration::from_secs(60 * 60),
            Timeframe::FourHours => Duration::from_secs(4 * 60 * 60),
            Timeframe::OneDay => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Number of bars of this timeframe needed to cover `period`, rounded up.
    pub fn bars_in(&self, period: Duration) -> usize {
        let bar = self.duration().as_secs().max(1);
        period.as_secs().div_ceil(bar) as usize
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::OneMinute),
            "5m" => Ok(Timeframe::FiveMinutes),
            "15m" => Ok(Timeframe::FifteenMinutes),
            "1h" => Ok(Timeframe::OneHour),
            "4h" => Ok(Timeframe::FourHours),
            "1d" => Ok(Timeframe::OneDay),
            other => Err(format!("unsupported timeframe: {other}")),
        }
    }
}

/// Aggregated open/high/low/close/volume for an instrument over one [`Timeframe`] window.
///
/// `timestamp` is the window open time.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct CandleBar {
    pub instrument: Symbol,
    pub timestamp: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl CandleBar {
    /// Validate OHLCV consistency.
    pub fn validate(&self) -> Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|price| !price.is_finite() || *price <= 0.0) {
            return Err("non-positive or non-finite price".to_string());
        }
        if self.high < self.low {
            return Err(format!("high {} below low {}", self.high, self.low));
        }
        if self.open > self.high || self.open < self.low || self.close > self.high || self.close < self.low {
            return Err("open/close outside high-low range".to_string());
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(format!("negative volume {}", self.volume));
        }
        Ok(())
    }

    /// True range versus the previous bar's close.
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let range = self.high - self.low;
        match prev_close {
            Some(prev_close) => range
                .max((self.high - prev_close).abs())
                .max((self.low - prev_close).abs()),
            None => range,
        }
    }
}
