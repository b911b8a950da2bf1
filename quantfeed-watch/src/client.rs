//! Reconnecting client for the quantfeed streaming channel.
//!
//! Keeps the set of subscribed symbols locally and replays it after every reconnect, so a
//! server restart only costs the frames missed while disconnected.

use futures::{SinkExt, StreamExt};
use quantfeed_data::{
    instrument::Symbol,
    protocol::{ClientCommand, ServerFrame},
};
use std::{collections::BTreeSet, time::Duration};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// WebSocket client configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// WebSocket server URL
    pub url: String,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
    /// Maximum channel buffer size for frames
    pub channel_buffer_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            channel_buffer_size: 1000,
        }
    }
}

impl WatchConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Symbols the client wants, replayed as `subscribe` commands on every (re)connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    symbols: BTreeSet<Symbol>,
}

impl Subscriptions {
    /// Track the effect of `command` on the wanted symbol set.
    pub fn apply(&mut self, command: &ClientCommand) {
        match command {
            ClientCommand::Subscribe { symbol } => {
                if let Ok(symbol) = Symbol::parse(symbol) {
                    self.symbols.insert(symbol);
                }
            }
            ClientCommand::Unsubscribe { symbol } => {
                if let Ok(symbol) = Symbol::parse(symbol) {
                    self.symbols.remove(&symbol);
                }
            }
            ClientCommand::GetPrice { .. } | ClientCommand::Ping => {}
        }
    }

    pub fn replay(&self) -> Vec<ClientCommand> {
        self.symbols
            .iter()
            .map(|symbol| ClientCommand::subscribe(symbol.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Sends commands to a running [`WatchClient`].
#[derive(Debug, Clone)]
pub struct WatchHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl WatchHandle {
    pub fn subscribe(&self, symbol: impl Into<String>) -> bool {
        self.send(ClientCommand::subscribe(symbol))
    }

    pub fn unsubscribe(&self, symbol: impl Into<String>) -> bool {
        self.send(ClientCommand::unsubscribe(symbol))
    }

    /// Queue `command`, returning false once the client has stopped.
    pub fn send(&self, command: ClientCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// WebSocket client for quantfeed frames
#[derive(Debug)]
pub struct WatchClient {
    config: WatchConfig,
    subscriptions: Subscriptions,
}

impl WatchClient {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            subscriptions: Subscriptions::default(),
        }
    }

    /// Subscribe to `symbols` from the first connection onward.
    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for symbol in symbols {
            self.subscriptions.apply(&ClientCommand::subscribe(symbol));
        }
        self
    }

    /// Start the connection loop.
    ///
    /// Returns a handle for further commands, a receiver of server frames and a receiver of
    /// connection status updates. The loop stops once the frame receiver is dropped.
    pub fn start(
        self,
    ) -> (
        WatchHandle,
        mpsc::Receiver<ServerFrame>,
        mpsc::Receiver<ConnectionStatus>,
    ) {
        let (frame_tx, frame_rx) = mpsc::channel(self.config.channel_buffer_size);
        let (status_tx, status_rx) = mpsc::channel(10);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_watch_loop(
            self.config,
            self.subscriptions,
            command_rx,
            frame_tx,
            status_tx,
        ));

        (
            WatchHandle {
                commands: command_tx,
            },
            frame_rx,
            status_rx,
        )
    }
}

enum Exit {
    Reconnect,
    Stop,
}

/// Main WebSocket connection loop with auto-reconnect
async fn run_watch_loop(
    config: WatchConfig,
    mut subscriptions: Subscriptions,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    frame_tx: mpsc::Sender<ServerFrame>,
    status_tx: mpsc::Sender<ConnectionStatus>,
) {
    info!("Starting watch client for {}", config.url);

    loop {
        let _ = status_tx.try_send(ConnectionStatus::Reconnecting);

        let exit = match connect_async(config.url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("Connected to {}", config.url);
                let _ = status_tx.try_send(ConnectionStatus::Connected);

                let exit = run_connection(
                    ws_stream,
                    &config,
                    &mut subscriptions,
                    &mut commands,
                    &frame_tx,
                )
                .await;

                let _ = status_tx.try_send(ConnectionStatus::Disconnected);
                exit
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", config.url, e);
                let _ = status_tx.try_send(ConnectionStatus::Disconnected);
                Exit::Reconnect
            }
        };

        if let Exit::Stop = exit {
            info!("Frame receiver dropped, stopping watch client");
            return;
        }

        debug!("Waiting {:?} before reconnecting...", config.reconnect_delay);
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn run_connection<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    config: &WatchConfig,
    subscriptions: &mut Subscriptions,
    commands: &mut mpsc::UnboundedReceiver<ClientCommand>,
    frame_tx: &mpsc::Sender<ServerFrame>,
) -> Exit
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    for command in subscriptions.replay() {
        if send_command(&mut write, &command).await.is_err() {
            return Exit::Reconnect;
        }
    }
    if !subscriptions.is_empty() {
        info!(symbols = subscriptions.len(), "replayed subscriptions");
    }

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.tick().await;
    let mut commands_open = true;

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(frame) => {
                            if frame_tx.send(frame).await.is_err() {
                                return Exit::Stop;
                            }
                        }
                        Err(e) => {
                            error!("Failed to parse frame: {}", e);
                            debug!("Raw frame: {}", text);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    warn!("Server closed connection, will reconnect...");
                    return Exit::Reconnect;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Exit::Reconnect;
                }
            },
            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    subscriptions.apply(&command);
                    if send_command(&mut write, &command).await.is_err() {
                        return Exit::Reconnect;
                    }
                }
                None => commands_open = false,
            },
            _ = ping.tick() => {
                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!("Failed to send ping, connection likely dead");
                    return Exit::Reconnect;
                }
            }
        }
    }
}

async fn send_command<W>(write: &mut W, command: &ClientCommand) -> Result<(), ()>
where
    W: futures::Sink<Message> + Unpin,
{
    let json = serde_json::to_string(command).map_err(|e| error!("Failed to encode command: {}", e))?;
    write.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_config_builder() {
        let config = WatchConfig::new("ws://localhost:8080")
            .with_ping_interval(Duration::from_secs(15))
            .with_reconnect_delay(Duration::from_secs(5))
            .with_channel_buffer_size(500);

        assert_eq!(config.url, "ws://localhost:8080");
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.channel_buffer_size, 500);
    }

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:9001");
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.channel_buffer_size, 1000);
    }

    #[test]
    fn test_subscriptions_apply() {
        struct TestCase {
            input: ClientCommand,
            expected: Vec<ClientCommand>,
        }

        let mut subscriptions = Subscriptions::default();

        let tests = vec![
            TestCase {
                // TC0: subscribe is normalised
                input: ClientCommand::subscribe("btcusdt"),
                expected: vec![ClientCommand::subscribe("BTCUSDT")],
            },
            TestCase {
                // TC1: replay is ordered
                input: ClientCommand::subscribe("ETHUSDT"),
                expected: vec![ClientCommand::subscribe("BTCUSDT"), ClientCommand::subscribe("ETHUSDT")],
            },
            TestCase {
                // TC2: invalid symbols are not remembered
                input: ClientCommand::subscribe(""),
                expected: vec![ClientCommand::subscribe("BTCUSDT"), ClientCommand::subscribe("ETHUSDT")],
            },
            TestCase {
                // TC3: unsubscribe forgets
                input: ClientCommand::unsubscribe("btcusdt"),
                expected: vec![ClientCommand::subscribe("ETHUSDT")],
            },
            TestCase {
                // TC4: ping changes nothing
                input: ClientCommand::Ping,
                expected: vec![ClientCommand::subscribe("ETHUSDT")],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            subscriptions.apply(&test.input);
            assert_eq!(subscriptions.replay(), test.expected, "TC{} failed", index);
        }
    }

    async fn next_command<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>) -> ClientCommand
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        loop {
            if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_subscriptions_are_replayed_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let client = WatchClient::new(WatchConfig::new(url).with_reconnect_delay(Duration::from_millis(20)))
            .with_symbols(["xyz"]);
        let (handle, mut frames, _status) = client.start();

        // First connection: initial symbol, then a runtime subscription, then a dropped link
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        assert_eq!(next_command(&mut ws).await, ClientCommand::subscribe("XYZ"));
        assert!(handle.subscribe("abc"));
        assert_eq!(next_command(&mut ws).await, ClientCommand::subscribe("abc"));

        let pong = serde_json::to_string(&ServerFrame::Pong).unwrap();
        ws.send(Message::Text(pong.into())).await.unwrap();
        assert_eq!(frames.recv().await, Some(ServerFrame::Pong));
        drop(ws);

        // Second connection: both symbols replayed in order
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        assert_eq!(next_command(&mut ws).await, ClientCommand::subscribe("ABC"));
        assert_eq!(next_command(&mut ws).await, ClientCommand::subscribe("XYZ"));
    }
}
