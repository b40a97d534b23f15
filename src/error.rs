//! Error types for reliable-socket

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("Buffer store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Connection closed")]
    Closed,
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SocketError>;
