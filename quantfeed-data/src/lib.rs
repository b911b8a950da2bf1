#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # QuantFeed-Data
//! Market data core: keeps a live, ref-counted set of symbols polled from an external
//! price provider, ingests their OHLCV bars, derives technical indicators and
//! rule-based trading signals, and publishes every accepted tick and new signal as a
//! [`FeedEvent`](event::FeedEvent).
//!
//! ## Overview
//! * [`SubscriptionRegistry`](subscription::SubscriptionRegistry): per-symbol ref counts
//!   that enrol a symbol into both workers on its first subscriber and retire it on its
//!   last.
//! * [`FetchWorker`](worker::fetch::FetchWorker): batched live quote polling into the
//!   [`PriceCache`](cache::PriceCache).
//! * [`CandleIngestWorker`](worker::candle::CandleIngestWorker): idempotent OHLCV upserts
//!   into a [`TimeSeriesStore`](store::TimeSeriesStore).
//! * [`IndicatorEngine`](indicator::IndicatorEngine) and
//!   [`SignalGenerator`](signal::SignalGenerator): pure computations from a bar window
//!   to an optional [`Signal`](signal::Signal).
//! * [`SignalStore`](signal::store::SignalStore): at most one active signal per
//!   (symbol, strategy).
//! * [`Feed`](feed::Feed): wires all of the above and spawns the background loops.
//!
//! ## Example
//! ```rust,no_run
//! use quantfeed_data::{
//!     config::FeedConfig,
//!     feed::Feed,
//!     instrument::Symbol,
//!     source::binance::BinanceRest,
//!     store::InMemoryTimeSeriesStore,
//!     subscription::ConnectionId,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let feed = Feed::spawn(
//!         Arc::new(BinanceRest::new()?),
//!         Arc::new(InMemoryTimeSeriesStore::new()),
//!         FeedConfig::from_env()?,
//!     )?;
//!
//!     let mut events = feed.events();
//!     feed.registry.subscribe(ConnectionId(1), Symbol::parse("btcusdt")?);
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

/// Latest tick per symbol with TTL expiry.
pub mod cache;

/// OHLCV bars and timeframes.
pub mod candle;

/// Environment driven [`FeedConfig`](config::FeedConfig).
pub mod config;

/// Serde helpers for provider payloads.
pub mod de;

/// All [`Error`](std::error::Error)s generated in QuantFeed-Data.
pub mod error;

/// Events published by the feed.
pub mod event;

/// Assembly of the running feed.
pub mod feed;

/// Technical indicators computed over OHLCV windows.
pub mod indicator;

/// Normalised [`Symbol`](instrument::Symbol) identifiers.
pub mod instrument;

/// Price events to signals.
pub mod pipeline;

/// Client and server frames of the streaming channel.
pub mod protocol;

/// Live quote model.
pub mod quote;

/// Rule based signals and their storage.
pub mod signal;

/// External price providers.
pub mod source;

/// Durable OHLCV storage.
pub mod store;

/// Ref-counted symbol subscriptions driving worker enrollment.
pub mod subscription;

/// Periodic expiry of ticks and signals.
pub mod sweeper;

/// Background polling loops.
pub mod worker;
