use quantfeed_data::{
    error::{ConfigError, SourceError, SymbolError},
    subscription::ConnectionId,
};
use std::net::SocketAddr;
use thiserror::Error;

/// Rejection of a client command, answered with an `error` frame on that connection only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),

    #[error("malformed command: {0}")]
    Malformed(String),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("no live price for {0}")]
    PriceNotFound(String),
}

/// Failure to start the server process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("price source: {0}")]
    Source(#[from] SourceError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(std::io::Error),
}
