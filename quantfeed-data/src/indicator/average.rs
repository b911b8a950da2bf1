//! Moving averages over a close (or volume) series, oldest value first.

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential moving average, seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Every EMA value from index `period - 1` onward.
///
/// Empty when fewer than `period` values are available.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(seed);
    for value in &values[period..] {
        let prev = series[series.len() - 1];
        series.push(alpha * value + (1.0 - alpha) * prev);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        struct TestCase {
            values: Vec<f64>,
            period: usize,
            expected: Option<f64>,
        }

        let tests = vec![
            TestCase {
                // TC0: uses only the trailing window
                values: vec![100.0, 1.0, 2.0, 3.0],
                period: 3,
                expected: Some(2.0),
            },
            TestCase {
                // TC1: too short
                values: vec![1.0, 2.0],
                period: 3,
                expected: None,
            },
            TestCase {
                // TC2: zero period
                values: vec![1.0],
                period: 0,
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(sma(&test.values, test.period), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_ema_seeded_with_sma_then_smoothed() {
        // period 3: alpha = 0.5, seed = mean(1, 2, 3) = 2
        let values = [1.0, 2.0, 3.0, 6.0, 8.0];
        assert_eq!(ema_series(&values, 3), vec![2.0, 4.0, 6.0]);
        assert_eq!(ema(&values, 3), Some(6.0));
        assert_eq!(ema(&values[..2], 3), None);
    }

    #[test]
    fn test_ema_of_constant_series_is_constant() {
        let values = vec![42.0; 30];
        let ema = ema(&values, 12).unwrap();
        assert!((ema - 42.0).abs() < 1e-12);
    }
}
