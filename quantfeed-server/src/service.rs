use crate::{connection::ConnectionManager, error::CommandError};
use chrono::Utc;
use quantfeed_data::{
    cache::PriceCache,
    feed::Feed,
    instrument::Symbol,
    protocol::{ClientCommand, ServerFrame},
    quote::PriceTick,
    signal::{Signal, store::SignalStore},
    subscription::{ConnectionId, SubscriptionRegistry},
};
use std::sync::Arc;
use tracing::debug;

/// Query and command surface over a running feed.
///
/// Used by each connection task to answer inbound commands, and directly by any other
/// collaborator that needs prices or signals.
#[derive(Debug, Clone)]
pub struct MarketService {
    connections: Arc<ConnectionManager>,
    cache: Arc<PriceCache>,
    signals: Arc<SignalStore>,
}

impl MarketService {
    pub fn new(
        connections: Arc<ConnectionManager>,
        cache: Arc<PriceCache>,
        signals: Arc<SignalStore>,
    ) -> Self {
        Self {
            connections,
            cache,
            signals,
        }
    }

    /// Service over `feed`'s shared state with a fresh [`ConnectionManager`] whose
    /// per-connection queues hold `outbound_capacity` frames.
    pub fn from_feed(feed: &Feed, outbound_capacity: usize) -> Self {
        Self::new(
            Arc::new(ConnectionManager::new(Arc::clone(&feed.registry), outbound_capacity)),
            Arc::clone(&feed.cache),
            Arc::clone(&feed.signals),
        )
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        self.connections.registry()
    }

    /// Subscribe `connection` to `raw`, queueing the confirmation and the last known
    /// price on the connection.
    pub fn subscribe(&self, connection: ConnectionId, raw: &str) -> Result<Symbol, CommandError> {
        let symbol = Symbol::parse(raw)?;
        self.connections
            .subscribe(connection, &symbol, |symbol| self.cache.get(symbol))?;
        Ok(symbol)
    }

    pub fn unsubscribe(&self, connection: ConnectionId, raw: &str) -> Result<Symbol, CommandError> {
        let symbol = Symbol::parse(raw)?;
        self.connections.unsubscribe(connection, &symbol);
        Ok(symbol)
    }

    pub fn get_live_price(&self, symbol: &Symbol) -> Option<PriceTick> {
        self.cache.get(symbol)
    }

    /// Active signals for `symbol`, or for every symbol when `None`.
    pub fn get_active_signals(&self, symbol: Option<&Symbol>) -> Vec<Signal> {
        let now = Utc::now();
        match symbol {
            Some(symbol) => self.signals.active_for(symbol, now),
            None => self.signals.active(now),
        }
    }

    /// Answer one inbound text frame from `connection`, queueing every reply on the
    /// connection's outbound queue.
    ///
    /// Invalid commands are answered with an `error` frame and leave the connection open.
    /// An error is returned only once the connection itself is gone.
    pub fn handle(&self, connection: ConnectionId, text: &str) -> Result<(), CommandError> {
        let replies = match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => match self.execute(connection, command) {
                Ok(frames) => frames,
                Err(CommandError::UnknownConnection(id)) => {
                    return Err(CommandError::UnknownConnection(id));
                }
                Err(error) => {
                    debug!(%connection, %error, "command rejected");
                    vec![ServerFrame::error(error.to_string())]
                }
            },
            Err(error) => {
                debug!(%connection, %error, "malformed command");
                vec![ServerFrame::error(CommandError::Malformed(error.to_string()).to_string())]
            }
        };

        replies
            .into_iter()
            .try_for_each(|frame| self.connections.send(connection, frame))
    }

    fn execute(&self, connection: ConnectionId, command: ClientCommand) -> Result<Vec<ServerFrame>, CommandError> {
        match command {
            // Confirmation and replay are queued by the subscription itself
            ClientCommand::Subscribe { symbol } => self.subscribe(connection, &symbol).map(|_| Vec::new()),
            ClientCommand::Unsubscribe { symbol } => {
                let symbol = self.unsubscribe(connection, &symbol)?;
                Ok(vec![ServerFrame::SubscriptionConfirmed {
                    symbol,
                    subscribed: false,
                }])
            }
            ClientCommand::GetPrice { symbol } => {
                let symbol = Symbol::parse(&symbol)?;
                self.get_live_price(&symbol)
                    .map(|tick| vec![ServerFrame::PriceUpdate(tick)])
                    .ok_or_else(|| CommandError::PriceNotFound(symbol.to_string()))
            }
            ClientCommand::Ping => Ok(vec![ServerFrame::Pong]),
        }
    }
}
