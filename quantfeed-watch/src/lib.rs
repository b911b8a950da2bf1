#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]

//! # QuantFeed-Watch
//! Streaming client for `quantfeed-server`: a [`WatchClient`](client::WatchClient) that
//! reconnects on failure and replays its subscriptions, plus frame rendering used by the
//! `quantfeed-watch` terminal binary.

pub mod client;

/// One line terminal rendering of server frames.
pub mod render;
