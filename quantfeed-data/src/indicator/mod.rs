use crate::{candle::CandleBar, instrument::Symbol};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

/// Simple and exponential moving averages.
pub mod average;

/// Support/resistance levels and volume context.
pub mod levels;

/// RSI and MACD.
pub mod oscillator;

/// Bollinger bands and ATR.
pub mod volatility;

/// Bollinger band width in standard deviations.
pub const BOLLINGER_WIDTH: f64 = 2.0;

/// Named indicator in an [`IndicatorSnapshot`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    #[display("sma_20")]
    #[serde(rename = "sma_20")]
    Sma20,
    #[display("sma_50")]
    #[serde(rename = "sma_50")]
    Sma50,
    #[display("ema_12")]
    #[serde(rename = "ema_12")]
    Ema12,
    #[display("ema_26")]
    #[serde(rename = "ema_26")]
    Ema26,
    #[display("rsi_14")]
    #[serde(rename = "rsi_14")]
    Rsi14,
    #[display("macd")]
    Macd,
    #[display("macd_signal")]
    MacdSignal,
    #[display("macd_histogram")]
    MacdHistogram,
    #[display("bollinger_upper")]
    BollingerUpper,
    #[display("bollinger_middle")]
    BollingerMiddle,
    #[display("bollinger_lower")]
    BollingerLower,
    #[display("atr_14")]
    #[serde(rename = "atr_14")]
    Atr14,
    #[display("support")]
    Support,
    #[display("resistance")]
    Resistance,
    #[display("volume_sma_20")]
    #[serde(rename = "volume_sma_20")]
    VolumeSma20,
    #[display("volume_ratio")]
    VolumeRatio,
}

impl Indicator {
    /// Minimum number of bars in the window before this indicator is reported.
    pub fn min_bars(&self) -> usize {
        match self {
            Indicator::Ema12 => 12,
            Indicator::Rsi14 | Indicator::Atr14 => 15,
            Indicator::Sma20
            | Indicator::BollingerUpper
            | Indicator::BollingerMiddle
            | Indicator::BollingerLower
            | Indicator::Support
            | Indicator::Resistance
            | Indicator::VolumeSma20
            | Indicator::VolumeRatio => 20,
            Indicator::Ema26 | Indicator::Macd => 26,
            Indicator::MacdSignal | Indicator::MacdHistogram => 34,
            Indicator::Sma50 => 50,
        }
    }
}

/// Derived indicators for one symbol, computed from its most recent OHLCV window.
///
/// Indicators whose minimum window length is unmet are absent rather than defaulted.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct IndicatorSnapshot {
    pub symbol: Symbol,
    /// Open time of the newest bar in the window.
    pub as_of: Option<DateTime<Utc>>,
    pub values: BTreeMap<Indicator, f64>,
}

impl IndicatorSnapshot {
    pub fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            as_of: None,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, indicator: Indicator) -> Option<f64> {
        self.values.get(&indicator).copied()
    }

    pub fn contains(&self, indicator: Indicator) -> bool {
        self.values.contains_key(&indicator)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn insert(&mut self, indicator: Indicator, value: Option<f64>) {
        if let Some(value) = value.filter(|value| value.is_finite()) {
            self.values.insert(indicator, value);
        }
    }
}

/// Stateless indicator computation over an OHLCV window.
///
/// Safe to call concurrently for different symbols.
#[derive(Copy, Clone, Debug, Default)]
pub struct IndicatorEngine;

impl IndicatorEngine {
    /// Longest window any indicator needs.
    pub const MAX_WINDOW: usize = 50;

    /// Compute every indicator whose minimum window is met.
    ///
    /// `window` must be ordered oldest first.
    pub fn compute(symbol: &Symbol, window: &[CandleBar]) -> IndicatorSnapshot {
        let mut snapshot = IndicatorSnapshot::empty(symbol.clone());
        let Some(last) = window.last() else {
            return snapshot;
        };
        snapshot.as_of = Some(last.timestamp);

        let closes = window.iter().map(|bar| bar.close).collect::<Vec<_>>();
        let volumes = window.iter().map(|bar| bar.volume).collect::<Vec<_>>();

        snapshot.insert(Indicator::Sma20, average::sma(&closes, 20));
        snapshot.insert(Indicator::Sma50, average::sma(&closes, 50));
        snapshot.insert(Indicator::Ema12, average::ema(&closes, 12));
        snapshot.insert(Indicator::Ema26, average::ema(&closes, 26));
        snapshot.insert(Indicator::Rsi14, oscillator::rsi(&closes, 14));

        if let Some(macd) = oscillator::macd(&closes, 12, 26, 9) {
            snapshot.insert(Indicator::Macd, Some(macd.line));
            snapshot.insert(Indicator::MacdSignal, macd.signal);
            snapshot.insert(Indicator::MacdHistogram, macd.histogram());
        }

        if let Some(bands) = volatility::bollinger(&closes, 20, BOLLINGER_WIDTH) {
            snapshot.insert(Indicator::BollingerUpper, Some(bands.upper));
            snapshot.insert(Indicator::BollingerMiddle, Some(bands.middle));
            snapshot.insert(Indicator::BollingerLower, Some(bands.lower));
        }

        snapshot.insert(Indicator::Atr14, volatility::atr(window, 14));

        if let Some((support, resistance)) = levels::support_resistance(window, 20) {
            snapshot.insert(Indicator::Support, Some(support));
            snapshot.insert(Indicator::Resistance, Some(resistance));
        }

        if let Some((average, ratio)) = levels::volume_ratio(&volumes, 20) {
            snapshot.insert(Indicator::VolumeSma20, Some(average));
            snapshot.insert(Indicator::VolumeRatio, ratio);
        }

        trace!(
            %symbol,
            bars = window.len(),
            indicators = snapshot.len(),
            "computed indicator snapshot"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::test_utils::bars_from_closes;

    fn rising(len: usize) -> Vec<CandleBar> {
        let closes = (0..len).map(|i| 100.0 + i as f64).collect::<Vec<_>>();
        bars_from_closes("XYZ", &closes)
    }

    #[test]
    fn test_compute_reports_only_indicators_whose_minimum_is_met() {
        struct TestCase {
            bars: usize,
            expected: Vec<Indicator>,
        }

        let tests = vec![
            TestCase {
                // TC0: nothing needs fewer than 12 bars
                bars: 10,
                expected: vec![],
            },
            TestCase {
                // TC1: RSI needs 15 closes, EMA12 only 12
                bars: 14,
                expected: vec![Indicator::Ema12],
            },
            TestCase {
                // TC2: banded family and volume join at 20
                bars: 20,
                expected: vec![
                    Indicator::Sma20,
                    Indicator::Ema12,
                    Indicator::Rsi14,
                    Indicator::BollingerUpper,
                    Indicator::BollingerMiddle,
                    Indicator::BollingerLower,
                    Indicator::Atr14,
                    Indicator::Support,
                    Indicator::Resistance,
                    Indicator::VolumeSma20,
                    Indicator::VolumeRatio,
                ],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let snapshot = IndicatorEngine::compute(&Symbol::new("XYZ"), &rising(test.bars));
            let mut expected = test.expected;
            expected.sort();
            assert_eq!(
                snapshot.values.keys().copied().collect::<Vec<_>>(),
                expected,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_compute_full_window_reports_everything() {
        let snapshot = IndicatorEngine::compute(&Symbol::new("XYZ"), &rising(IndicatorEngine::MAX_WINDOW));
        assert_eq!(snapshot.len(), 16);
        for (indicator, _) in &snapshot.values {
            assert!(indicator.min_bars() <= IndicatorEngine::MAX_WINDOW);
        }
        assert_eq!(snapshot.as_of, rising(50).last().map(|bar| bar.timestamp));
        assert_eq!(snapshot.get(Indicator::Rsi14), Some(100.0));
        assert_eq!(snapshot.get(Indicator::Sma50), Some(124.5));
    }

    #[test]
    fn test_compute_empty_window() {
        let snapshot = IndicatorEngine::compute(&Symbol::new("XYZ"), &[]);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.as_of, None);
    }

    #[test]
    fn test_min_bars_agrees_with_compute() {
        let all = IndicatorEngine::compute(&Symbol::new("XYZ"), &rising(IndicatorEngine::MAX_WINDOW));
        for indicator in all.values.keys() {
            let at_min = IndicatorEngine::compute(&Symbol::new("XYZ"), &rising(indicator.min_bars()));
            assert!(at_min.contains(*indicator), "{indicator} missing at its minimum");

            let below = IndicatorEngine::compute(&Symbol::new("XYZ"), &rising(indicator.min_bars() - 1));
            assert!(!below.contains(*indicator), "{indicator} present below its minimum");
        }
    }

    #[test]
    fn test_indicator_serialises_as_display_name() {
        assert_eq!(serde_json::to_string(&Indicator::Rsi14).unwrap(), "\"rsi_14\"");
        assert_eq!(serde_json::to_string(&Indicator::MacdSignal).unwrap(), "\"macd_signal\"");
        assert_eq!(Indicator::VolumeSma20.to_string(), "volume_sma_20");
    }
}
