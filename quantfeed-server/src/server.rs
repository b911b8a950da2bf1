use crate::{error::ServerError, service::MarketService};
use futures::{SinkExt, StreamExt};
use quantfeed_data::worker::Shutdown;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Accept WebSocket clients on `listener` until shutdown, spawning one task per
/// connection.
pub async fn serve(listener: TcpListener, service: Arc<MarketService>, mut shutdown: Shutdown) {
    match listener.local_addr() {
        Ok(addr) => info!("WebSocket server listening on ws://{}", addr),
        Err(error) => warn!(%error, "WebSocket server listening on unknown address"),
    }

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait() => break,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                debug!("New WebSocket connection from {}", peer_addr);
                tokio::spawn(handle_client(stream, peer_addr, Arc::clone(&service)));
            }
            Err(error) => {
                warn!(%error, "failed to accept connection");
            }
        }
    }

    info!("WebSocket server stopped accepting connections");
}

/// Drive one client connection until either side closes.
///
/// Outbound frames are drained from the connection's bounded queue by a send task, inbound
/// commands are answered through the same queue by a receive task. When either ends the
/// other is aborted and the connection's subscriptions are released.
async fn handle_client(stream: TcpStream, peer_addr: SocketAddr, service: Arc<MarketService>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    let connections = Arc::clone(service.connections());
    let (connection, mut outbound) = connections.connect(Some(peer_addr));
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(error) => {
                    error!(%connection, %error, "failed to serialise frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let recv_service = Arc::clone(&service);
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if recv_service.handle(connection, text.as_str()).is_err() {
                        return;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    // Tungstenite answers pings itself
                    debug!("Received ping from {}", peer_addr);
                }
                Ok(Message::Binary(_)) => {
                    let frame = quantfeed_data::protocol::ServerFrame::error("binary frames are not supported");
                    if recv_service.connections().send(connection, frame).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            debug!(%connection, "send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!(%connection, "receive task completed");
            send_task.abort();
        }
    }

    connections.disconnect(connection);
    info!("WebSocket connection closed for {}", peer_addr);
}
