use crate::error::CommandError;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use quantfeed_data::{
    instrument::Symbol,
    protocol::ServerFrame,
    quote::PriceTick,
    subscription::{ConnectionId, SubscriptionRegistry, Transition},
};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Peer {
    addr: Option<SocketAddr>,
    outbound: mpsc::Sender<ServerFrame>,
    /// Timestamp of the newest price queued per symbol.
    latest: FnvHashMap<Symbol, DateTime<Utc>>,
}

impl Peer {
    /// Queue `frame`, silently skipping a price older than one already queued for the
    /// same symbol.
    fn queue(&mut self, frame: ServerFrame) -> Result<(), TrySendError<ServerFrame>> {
        let ServerFrame::PriceUpdate(tick) = &frame else {
            return self.outbound.try_send(frame);
        };

        if self
            .latest
            .get(&tick.symbol)
            .is_some_and(|latest| tick.timestamp < *latest)
        {
            debug!(symbol = %tick.symbol, "skipping superseded price");
            return Ok(());
        }

        let (symbol, timestamp) = (tick.symbol.clone(), tick.timestamp);
        self.outbound.try_send(frame)?;
        self.latest.insert(symbol, timestamp);
        Ok(())
    }
}

/// Live client connections and their outbound frame queues.
///
/// Each connection owns one bounded queue drained by its delivery task, so frames for a
/// given connection are written in the order they were queued and a symbol's prices
/// never go backwards. A connection that stops draining its queue is dropped as a slow
/// consumer once the queue is full.
///
/// Connection liveness and subscriptions change under one lock: a subscribe either
/// completes before a disconnect releases everything, or is refused after it.
#[derive(Debug)]
pub struct ConnectionManager {
    next_id: AtomicU64,
    capacity: usize,
    peers: Mutex<FnvHashMap<ConnectionId, Peer>>,
    registry: Arc<SubscriptionRegistry>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<SubscriptionRegistry>, capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            peers: Mutex::new(FnvHashMap::default()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Register a new connection, returning its id and the receiving end of its queue.
    pub fn connect(&self, addr: Option<SocketAddr>) -> (ConnectionId, mpsc::Receiver<ServerFrame>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, rx) = mpsc::channel(self.capacity);
        self.peers.lock().insert(
            id,
            Peer {
                addr,
                outbound,
                latest: FnvHashMap::default(),
            },
        );
        info!(connection = %id, ?addr, "connection opened");
        (id, rx)
    }

    /// Remove `id` and release every symbol it was subscribed to.
    ///
    /// Idempotent: a second call finds nothing to release.
    pub fn disconnect(&self, id: ConnectionId) -> Vec<(Symbol, Transition)> {
        let mut peers = self.peers.lock();
        self.close(&mut peers, id)
    }

    /// Subscribe `id` to `symbol`, then queue the confirmation followed by the price
    /// `replay` returns, if any.
    ///
    /// No fan-out to `id` can be queued between the subscription and its replies.
    pub fn subscribe<F>(&self, id: ConnectionId, symbol: &Symbol, replay: F) -> Result<Transition, CommandError>
    where
        F: FnOnce(&Symbol) -> Option<PriceTick>,
    {
        let mut peers = self.peers.lock();
        let Some(peer) = peers.get_mut(&id) else {
            return Err(CommandError::UnknownConnection(id));
        };

        let transition = self.registry.subscribe(id, symbol.clone());
        let confirmed = ServerFrame::SubscriptionConfirmed {
            symbol: symbol.clone(),
            subscribed: true,
        };
        let queued = std::iter::once(confirmed)
            .chain(replay(symbol).map(ServerFrame::PriceUpdate))
            .try_for_each(|frame| peer.queue(frame));

        match queued {
            Ok(()) => Ok(transition),
            Err(error) => {
                self.drop_peer(&mut peers, id, &error);
                Err(CommandError::UnknownConnection(id))
            }
        }
    }

    /// Unsubscribe `id` from `symbol`. Unknown pairs are a no-op.
    pub fn unsubscribe(&self, id: ConnectionId, symbol: &Symbol) -> Transition {
        let mut peers = self.peers.lock();
        if let Some(peer) = peers.get_mut(&id) {
            peer.latest.remove(symbol);
        }
        self.registry.unsubscribe(id, symbol)
    }

    /// Queue `frame` for `id`.
    ///
    /// A connection whose queue is gone or full is disconnected and
    /// [`CommandError::UnknownConnection`] returned, never retried.
    pub fn send(&self, id: ConnectionId, frame: ServerFrame) -> Result<(), CommandError> {
        let mut peers = self.peers.lock();
        let queued = match peers.get_mut(&id) {
            Some(peer) => peer.queue(frame),
            None => {
                self.close(&mut peers, id);
                return Err(CommandError::UnknownConnection(id));
            }
        };

        queued.map_err(|error| {
            self.drop_peer(&mut peers, id, &error);
            CommandError::UnknownConnection(id)
        })
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.peers.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    fn drop_peer(
        &self,
        peers: &mut FnvHashMap<ConnectionId, Peer>,
        id: ConnectionId,
        error: &TrySendError<ServerFrame>,
    ) {
        match error {
            TrySendError::Full(_) => {
                warn!(connection = %id, capacity = self.capacity, "outbound queue full, dropping slow consumer")
            }
            TrySendError::Closed(_) => debug!(connection = %id, "dropping dead peer"),
        }
        self.close(peers, id);
    }

    fn close(&self, peers: &mut FnvHashMap<ConnectionId, Peer>, id: ConnectionId) -> Vec<(Symbol, Transition)> {
        let peer = peers.remove(&id);
        let released = self.registry.disconnect_all(id);
        if let Some(peer) = peer {
            info!(
                connection = %id,
                addr = ?peer.addr,
                released = released.len(),
                "connection closed"
            );
        }
        released
    }
}
