use crate::error::SymbolError;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::borrow::Borrow;

/// Maximum accepted length of a [`Symbol`].
pub const SYMBOL_MAX_LEN: usize = 32;

/// Opaque instrument identifier (eg/ "AAPL", "BTCUSDT", "^GSPC").
///
/// Everything in the feed is keyed by `Symbol`. Cheap to clone.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Symbol(SmolStr);

impl Symbol {
    /// Construct a `Symbol` verbatim, without normalisation.
    pub fn new<S: AsRef<str>>(symbol: S) -> Self {
        Self(SmolStr::new(symbol))
    }

    /// Normalise and validate raw user input: surrounding whitespace is trimmed and the
    /// symbol is uppercased.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        if trimmed.chars().count() > SYMBOL_MAX_LEN {
            return Err(SymbolError::TooLong {
                symbol: trimmed.to_string(),
                max: SYMBOL_MAX_LEN,
            });
        }
        if let Some(character) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '^' | '=' | '/')))
        {
            return Err(SymbolError::InvalidCharacter {
                symbol: trimmed.to_string(),
                character,
            });
        }

        Ok(Self(SmolStr::new(trimmed.to_ascii_uppercase())))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(SmolStr::from(value))
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}
