use crate::instrument::Symbol;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by an [`ExternalPriceSource`](crate::source::ExternalPriceSource).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum SourceError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider rate limit exceeded (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider HTTP error: {0}")]
    Http(String),

    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("provider returned no quote for {0}")]
    MissingQuote(Symbol),

    #[error("provider returned invalid quote for {symbol}: {reason}")]
    InvalidQuote { symbol: Symbol, reason: String },
}

impl SourceError {
    /// Determine if an error is a transient provider condition that should be absorbed by
    /// worker level backoff rather than treated as bad data.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Timeout | SourceError::RateLimited { .. } | SourceError::Http(_) => true,
            _ => false,
        }
    }

    /// Provider supplied delay before the next request is allowed, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Http(error.to_string())
        }
    }
}

/// Errors returned by a [`TimeSeriesStore`](crate::store::TimeSeriesStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("time-series store unavailable: {0}")]
    Unavailable(String),

    #[error("rejected bar for {instrument}: {reason}")]
    InvalidBar { instrument: Symbol, reason: String },
}

/// Failure ingesting one symbol's bars during a candle cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Source(error) => error.is_transient(),
            IngestError::Store(StoreError::Unavailable(_)) => true,
            IngestError::Store(_) => false,
        }
    }
}

/// Errors produced while parsing a raw [`Symbol`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum SymbolError {
    #[error("symbol must not be empty")]
    Empty,

    #[error("symbol exceeds {max} characters: {symbol}")]
    TooLong { symbol: String, max: usize },

    #[error("symbol contains unsupported character {character:?}: {symbol}")]
    InvalidCharacter { symbol: String, character: char },
}

/// Errors produced while building configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for environment variable {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
