//! Volatility measures: Bollinger bands and ATR.

use super::average::sma;
use crate::candle::CandleBar;

/// Population standard deviation of the last `period` values.
pub fn std_dev(values: &[f64], period: usize) -> Option<f64> {
    let mean = sma(values, period)?;
    let window = &values[values.len() - period..];
    let variance = window.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / period as f64;
    Some(variance.sqrt())
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands: SMA(`period`) ± `width` standard deviations.
pub fn bollinger(closes: &[f64], period: usize, width: f64) -> Option<Bands> {
    let middle = sma(closes, period)?;
    let std = std_dev(closes, period)?;
    Some(Bands {
        upper: middle + width * std,
        middle,
        lower: middle - width * std,
    })
}

/// Wilder ATR over `period` true ranges, so `period + 1` bars are required.
pub fn atr(bars: &[CandleBar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let true_ranges = bars
        .windows(2)
        .map(|pair| pair[1].true_range(Some(pair[0].close)))
        .collect::<Vec<_>>();
    let (seed, rest) = true_ranges.split_at(period);

    let w = period as f64;
    let atr = rest
        .iter()
        .fold(seed.iter().sum::<f64>() / w, |atr, tr| (atr * (w - 1.0) + tr) / w);
    Some(atr)
}
