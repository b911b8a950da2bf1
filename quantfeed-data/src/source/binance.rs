use super::{ExternalPriceSource, QuoteBatch, RateBudget};
use crate::{
    candle::{CandleBar, Timeframe},
    de::de_str,
    error::SourceError,
    instrument::Symbol,
    quote::PriceTick,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use reqwest::{Client, Response, StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, de::IgnoredAny};
use smol_str::SmolStr;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tracing::{debug, warn};
use url::Url;

/// [`BinanceRest`] spot API base url.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api>
pub const BASE_URL_BINANCE_SPOT: &str = "https://api.binance.com";

/// Binance caps klines requests at 1000 bars.
pub const MAX_KLINES_LIMIT: usize = 1000;

/// Default per request timeout used by the underlying HTTP client.
pub const DEFAULT_BINANCE_TIMEOUT: Duration = Duration::from_secs(10);

const SOURCE_TAG: &str = "binance";

/// Binance spot REST [`ExternalPriceSource`].
///
/// Quotes come from the 24h rolling ticker endpoint (one request per batch), bars from
/// the klines endpoint.
#[derive(Debug, Clone)]
pub struct BinanceRest {
    client: Client,
    base_url: Url,
    requests: Arc<AtomicU64>,
}

impl BinanceRest {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(BASE_URL_BINANCE_SPOT, DEFAULT_BINANCE_TIMEOUT)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| SourceError::Rejected(format!("invalid base url {base_url}: {error}")))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            requests: Arc::new(AtomicU64::new(0)),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base_url
            .join(path)
            .map_err(|error| SourceError::Rejected(format!("invalid endpoint {path}: {error}")))
    }

    async fn fetch_tickers(&self, symbols: &[Symbol]) -> Result<Vec<BinanceTicker24h>, SourceError> {
        let symbols_param = format!("[{}]", symbols.iter().map(|symbol| format!("\"{symbol}\"")).join(","));
        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .get(self.endpoint("/api/v3/ticker/24hr")?)
            .query(&[("symbols", symbols_param.as_str())])
            .send()
            .await?;

        Ok(check_status(response).await?.json::<Vec<BinanceTicker24h>>().await?)
    }

    async fn fetch_symbol_individually(&self, symbol: &Symbol) -> Result<PriceTick, SourceError> {
        let tickers = self.fetch_tickers(std::slice::from_ref(symbol)).await?;
        assemble_batch(std::slice::from_ref(symbol), tickers)
            .remove(symbol)
            .unwrap_or_else(|| Err(SourceError::MissingQuote(symbol.clone())))
    }
}

#[async_trait]
impl ExternalPriceSource for BinanceRest {
    fn name(&self) -> &'static str {
        SOURCE_TAG
    }

    fn rate_budget(&self) -> RateBudget {
        // Conservative share of the 6000 request weight per minute IP limit.
        RateBudget {
            max_requests: 1200,
            per: Duration::from_secs(60),
        }
    }

    fn requests_issued(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    async fn live_quotes(&self, symbols: &[Symbol]) -> Result<QuoteBatch, SourceError> {
        if symbols.is_empty() {
            return Ok(QuoteBatch::default());
        }

        match self.fetch_tickers(symbols).await {
            Ok(tickers) => Ok(assemble_batch(symbols, tickers)),
            // A single unknown symbol makes Binance reject the whole batch, so fall back to
            // per-symbol requests to keep the failure isolated to that symbol.
            Err(SourceError::Rejected(reason)) if symbols.len() > 1 => {
                warn!(%reason, batch = symbols.len(), "Binance rejected quote batch, retrying per symbol");
                let mut batch = QuoteBatch::default();
                for symbol in symbols {
                    let result = match self.fetch_symbol_individually(symbol).await {
                        Err(error) if error.is_transient() => return Err(error),
                        result => result,
                    };
                    batch.insert(symbol.clone(), result);
                }
                Ok(batch)
            }
            Err(error) => Err(error),
        }
    }

    async fn recent_bars(
        &self,
        symbol: &Symbol,
        period: Duration,
        interval: Timeframe,
    ) -> Result<Vec<CandleBar>, SourceError> {
        let limit = interval.bars_in(period).clamp(1, MAX_KLINES_LIMIT);
        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .get(self.endpoint("/api/v3/klines")?)
            .query(&[
                ("symbol", symbol.as_str()),
                ("interval", interval.as_str()),
                ("limit", limit.to_string().as_str()),
            ])
            .send()
            .await?;

        let klines = check_status(response).await?.json::<Vec<BinanceKline>>().await?;
        debug!(%symbol, %interval, bars = klines.len(), "fetched Binance klines");

        klines
            .into_iter()
            .map(|kline| kline.into_bar(symbol, interval))
            .collect()
    }
}

/// Map Binance HTTP status codes onto [`SourceError`] variants.
async fn check_status(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::IM_A_TEAPOT => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(SourceError::RateLimited { retry_after })
        }
        StatusCode::BAD_REQUEST => {
            let body = response.text().await.unwrap_or_default();
            Err(SourceError::Rejected(body))
        }
        status => Err(SourceError::Http(format!("unexpected status {status}"))),
    }
}

/// Binance 24h rolling window ticker.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#24hr-ticker-price-change-statistics>
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTicker24h {
    symbol: String,
    #[serde(deserialize_with = "de_str")]
    price_change: f64,
    #[serde(deserialize_with = "de_str")]
    price_change_percent: f64,
    #[serde(deserialize_with = "de_str")]
    last_price: f64,
    #[serde(deserialize_with = "de_str")]
    volume: f64,
    close_time: i64,
}

impl BinanceTicker24h {
    fn into_tick(self, symbol: Symbol) -> Result<PriceTick, SourceError> {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(self.close_time).ok_or_else(|| {
            SourceError::InvalidQuote {
                symbol: symbol.clone(),
                reason: format!("invalid closeTime {}", self.close_time),
            }
        })?;

        let tick = PriceTick {
            symbol,
            price: self.last_price,
            change: self.price_change,
            change_percent: self.price_change_percent,
            volume: self.volume,
            source: SmolStr::new_static(SOURCE_TAG),
            timestamp,
        };

        match tick.validate() {
            Ok(()) => Ok(tick),
            Err(reason) => Err(SourceError::InvalidQuote {
                symbol: tick.symbol,
                reason,
            }),
        }
    }
}

/// Pair each requested symbol with its ticker, reporting absent symbols individually.
fn assemble_batch(symbols: &[Symbol], tickers: Vec<BinanceTicker24h>) -> QuoteBatch {
    let mut batch = symbols
        .iter()
        .map(|symbol| (symbol.clone(), Err(SourceError::MissingQuote(symbol.clone()))))
        .collect::<QuoteBatch>();

    for ticker in tickers {
        let symbol = Symbol::new(&ticker.symbol);
        if let Some(slot) = batch.get_mut(&symbol) {
            *slot = ticker.into_tick(symbol);
        }
    }

    batch
}

/// Binance kline row.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#klinecandlestick-data>
#[derive(Debug, Deserialize)]
struct BinanceKline(
    i64,
    #[serde(deserialize_with = "de_str")] f64,
    #[serde(deserialize_with = "de_str")] f64,
    #[serde(deserialize_with = "de_str")] f64,
    #[serde(deserialize_with = "de_str")] f64,
    #[serde(deserialize_with = "de_str")] f64,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
);

impl BinanceKline {
    fn into_bar(self, symbol: &Symbol, timeframe: Timeframe) -> Result<CandleBar, SourceError> {
        let BinanceKline(open_time, open, high, low, close, volume, ..) = self;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(open_time)
            .ok_or_else(|| SourceError::Decode(format!("invalid kline open time {open_time}")))?;

        Ok(CandleBar {
            instrument: symbol.clone(),
            timestamp,
            timeframe,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}
