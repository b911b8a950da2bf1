use crate::instrument::Symbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Latest price observation for a [`Symbol`].
///
/// Last-write-wins per symbol, subject to timestamp monotonicity enforced by the
/// [`PriceCache`](crate::cache::PriceCache).
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct PriceTick {
    pub symbol: Symbol,
    /// Last traded price.
    pub price: f64,
    /// Absolute change versus the provider's reference price (usually previous close).
    pub change: f64,
    /// Percentage change versus the provider's reference price.
    pub change_percent: f64,
    pub volume: f64,
    /// Provider tag identifying where the tick came from (eg/ "binance").
    pub source: SmolStr,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    /// Validate the tick carries usable values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(format!("non-positive price {}", self.price));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(format!("negative volume {}", self.volume));
        }
        if !self.change.is_finite() || !self.change_percent.is_finite() {
            return Err("non-finite change".to_string());
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::tick;

    #[test]
    fn test_price_tick_validate() {
        assert!(tick("XYZ", 100.0, 1).validate().is_ok());
        assert!(tick("XYZ", 0.0, 1).validate().is_err());
        assert!(tick("XYZ", f64::NAN, 1).validate().is_err());

        let mut negative_volume = tick("XYZ", 100.0, 1);
        negative_volume.volume = -1.0;
        assert!(negative_volume.validate().is_err());
    }
}
