#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_extern_crates,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # QuantFeed-Server
//! WebSocket front of a [`Feed`](quantfeed_data::feed::Feed): clients subscribe to symbols
//! and receive `price_update` and `signal` frames for exactly the symbols they hold.
//!
//! * [`ConnectionManager`](connection::ConnectionManager): connection ids and per-connection
//!   outbound queues.
//! * [`Broadcaster`](broadcast::Broadcaster): fan-out of feed events to subscribers.
//! * [`MarketService`](service::MarketService): subscribe, unsubscribe, live price and
//!   active signal queries, plus inbound command handling.
//! * [`serve`](server::serve): accept loop and per-connection tasks.

/// Fan-out of feed events to subscribed connections.
pub mod broadcast;

/// Server listen address and feed configuration.
pub mod config;

/// Live client connections.
pub mod connection;

pub mod error;

/// Query and command surface.
pub mod service;

/// WebSocket accept loop and connection tasks.
pub mod server;
