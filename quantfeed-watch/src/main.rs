use quantfeed_watch::{
    client::{ConnectionStatus, WatchClient, WatchConfig},
    render::render,
};
use tracing::info;

/// Print every frame for the symbols given as arguments, eg/
/// `WS_URL=ws://127.0.0.1:9001 quantfeed-watch BTCUSDT ETHUSDT`.
#[tokio::main]
async fn main() {
    init_logging();

    let url = std::env::var("WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:9001".to_string());
    let symbols = std::env::args().skip(1).collect::<Vec<_>>();
    if symbols.is_empty() {
        eprintln!("usage: quantfeed-watch SYMBOL [SYMBOL ...]");
        std::process::exit(2);
    }

    info!(%url, ?symbols, "watching");
    let (_handle, mut frames, mut status) = WatchClient::new(WatchConfig::new(url))
        .with_symbols(symbols)
        .start();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => println!("{}", render(&frame)),
                None => break,
            },
            Some(status) = status.recv() => {
                if status != ConnectionStatus::Connected {
                    info!(?status, "connection status");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}
