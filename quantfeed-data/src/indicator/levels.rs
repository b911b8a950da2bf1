//! Price levels and volume context over a trailing window.

use super::average::sma;
use crate::candle::CandleBar;

/// Lowest low and highest high over the last `lookback` bars.
pub fn support_resistance(bars: &[CandleBar], lookback: usize) -> Option<(f64, f64)> {
    if lookback == 0 || bars.len() < lookback {
        return None;
    }

    bars[bars.len() - lookback..]
        .iter()
        .fold(None, |levels, bar| match levels {
            None => Some((bar.low, bar.high)),
            Some((support, resistance)) => Some((bar.low.min(support), bar.high.max(resistance))),
        })
}

/// Average volume over `period` bars and the latest bar's volume relative to it.
///
/// The ratio is absent when the average volume is zero.
pub fn volume_ratio(volumes: &[f64], period: usize) -> Option<(f64, Option<f64>)> {
    let average = sma(volumes, period)?;
    let latest = *volumes.last()?;
    let ratio = (average > 0.0).then(|| latest / average);
    Some((average, ratio))
}
