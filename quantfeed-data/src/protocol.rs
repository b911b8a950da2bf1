//! Frames exchanged over the per-connection streaming channel.
//!
//! Inbound: `{"action": "subscribe" | "unsubscribe" | "get_price" | "ping", "symbol": ...}`.
//! Outbound: `{"type": "price_update" | "signal" | "subscription_confirmed" | "error" | "pong", ...}`.

use crate::{event::FeedEvent, instrument::Symbol, quote::PriceTick, signal::Signal};
use serde::{Deserialize, Serialize};

/// Command sent by a client.
///
/// Symbols are carried raw and normalised by the receiver, so a malformed symbol can be
/// answered with an error frame naming it.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
    GetPrice { symbol: String },
    Ping,
}

impl ClientCommand {
    pub fn subscribe(symbol: impl Into<String>) -> Self {
        Self::Subscribe { symbol: symbol.into() }
    }

    pub fn unsubscribe(symbol: impl Into<String>) -> Self {
        Self::Unsubscribe { symbol: symbol.into() }
    }
}

/// Frame sent to a client.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    PriceUpdate(PriceTick),
    Signal(Signal),
    SubscriptionConfirmed { symbol: Symbol, subscribed: bool },
    Error { message: String },
    Pong,
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<FeedEvent> for ServerFrame {
    fn from(value: FeedEvent) -> Self {
        match value {
            FeedEvent::Price(tick) => ServerFrame::PriceUpdate(tick),
            FeedEvent::Signal(signal) => ServerFrame::Signal(signal),
        }
    }
}
