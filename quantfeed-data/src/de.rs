use serde::{Deserialize, Deserializer};
use std::{fmt::Display, str::FromStr};

/// Deserialize a `String` as the desired type.
pub fn de_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let data: &str = Deserialize::deserialize(deserializer)?;
    data.parse::<T>().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Price {
        #[serde(deserialize_with = "de_str")]
        value: f64,
    }

    #[test]
    fn test_de_str() {
        let price: Price = serde_json::from_str(r#"{"value":"101.25"}"#).unwrap();
        assert_eq!(price.value, 101.25);
        assert!(serde_json::from_str::<Price>(r#"{"value":"abc"}"#).is_err());
    }
}
