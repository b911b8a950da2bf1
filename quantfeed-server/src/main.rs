use quantfeed_data::{
    feed::Feed, source::binance::BinanceRest, store::InMemoryTimeSeriesStore,
    worker::shutdown_channel,
};
use quantfeed_server::{
    broadcast::Broadcaster, config::ServerConfig, error::ServerError, server, service::MarketService,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    init_logging();

    info!("Starting quantfeed WebSocket server");

    let config = ServerConfig::from_env()?;
    info!(
        buffer_size = config.feed.event_buffer_size,
        fetch_interval = ?config.feed.fetch.interval,
        "configuration loaded"
    );

    let outbound_capacity = config.feed.event_buffer_size;
    let feed = Feed::spawn(
        Arc::new(BinanceRest::new()?),
        Arc::new(InMemoryTimeSeriesStore::new()),
        config.feed,
    )?;

    let service = Arc::new(MarketService::from_feed(&feed, outbound_capacity));
    let (trigger, shutdown) = shutdown_channel();

    let broadcaster = Broadcaster::new(Arc::clone(service.connections()));
    let broadcast_task = tokio::spawn(broadcaster.run(feed.events(), shutdown.clone()));

    let listener = server::bind(config.addr).await?;
    let server_task = tokio::spawn(server::serve(listener, service, shutdown));

    tokio::signal::ctrl_c().await.map_err(ServerError::Signal)?;
    info!("Ctrl-C received, shutting down");

    trigger.trigger();
    let _ = tokio::join!(broadcast_task, server_task);
    feed.shutdown().await;

    Ok(())
}

/// Initialise logging, `LOG_FORMAT=json` selects structured JSON output.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
