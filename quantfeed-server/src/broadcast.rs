use crate::connection::ConnectionManager;
use quantfeed_data::{event::FeedEvent, protocol::ServerFrame, worker::Shutdown};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Outcome of fanning out one [`FeedEvent`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct Delivery {
    pub delivered: usize,
    pub dead: usize,
}

/// Fans out every [`FeedEvent`] to the connections subscribed to the event's symbol.
///
/// Delivery is best effort: a connection whose queue is closed or full is disconnected,
/// which also releases its subscriptions.
#[derive(Debug)]
pub struct Broadcaster {
    connections: Arc<ConnectionManager>,
}

impl Broadcaster {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    pub fn deliver(&self, event: FeedEvent) -> Delivery {
        let subscribers = self.connections.registry().subscribers(event.symbol());
        let frame = ServerFrame::from(event);

        subscribers
            .into_iter()
            .fold(Delivery::default(), |mut delivery, connection| {
                match self.connections.send(connection, frame.clone()) {
                    Ok(()) => delivery.delivered += 1,
                    Err(_) => delivery.dead += 1,
                }
                delivery
            })
    }

    pub async fn run(self, mut events: broadcast::Receiver<FeedEvent>, mut shutdown: Shutdown) {
        info!("Broadcaster started");

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.wait() => break,
            };

            match event {
                Ok(event) => {
                    let symbol = event.symbol().clone();
                    let delivery = self.deliver(event);
                    if delivery.dead > 0 {
                        warn!(%symbol, dead = delivery.dead, "removed dead peers during fan-out");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Slow fan-out only delays clients, it never disconnects them
                    warn!(skipped, "Broadcaster lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("feed event channel closed");
                    break;
                }
            }
        }

        info!("Broadcaster stopped");
    }
}
