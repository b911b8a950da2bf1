//! Momentum oscillators: RSI and MACD.

use super::average::{ema, ema_series};

/// Wilder RSI over `period` price changes, so `period + 1` closes are required.
///
/// A window with no losses reads 100, a flat window reads 50.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let changes = closes.windows(2).map(|pair| pair[1] - pair[0]).collect::<Vec<_>>();
    let (seed, rest) = changes.split_at(period);

    let mut avg_gain = seed.iter().map(|change| change.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = seed.iter().map(|change| (-change).max(0.0)).sum::<f64>() / period as f64;

    let w = period as f64;
    for change in rest {
        avg_gain = (avg_gain * (w - 1.0) + change.max(0.0)) / w;
        avg_loss = (avg_loss * (w - 1.0) + (-change).max(0.0)) / w;
    }

    Some(match (avg_gain, avg_loss) {
        (gain, loss) if gain == 0.0 && loss == 0.0 => 50.0,
        (_, loss) if loss == 0.0 => 100.0,
        (gain, loss) => 100.0 - 100.0 / (1.0 + gain / loss),
    })
}

/// Latest MACD values.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Macd {
    pub line: f64,
    /// EMA of the MACD line, absent until `slow + signal - 1` closes are available.
    pub signal: Option<f64>,
}

impl Macd {
    pub fn histogram(&self) -> Option<f64> {
        self.signal.map(|signal| self.line - signal)
    }
}

/// MACD line (`EMA(fast) - EMA(slow)`) and its `signal` period EMA.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow || closes.len() < slow {
        return None;
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);

    // Align both series on the close index they end at
    let offset = slow - fast;
    let line_series = slow_series
        .iter()
        .enumerate()
        .map(|(index, slow)| fast_series[index + offset] - slow)
        .collect::<Vec<_>>();

    Some(Macd {
        line: *line_series.last()?,
        signal: ema(&line_series, signal),
    })
}
