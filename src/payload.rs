//! Outbound payload kinds and normalization to raw bytes
//!
//! Every payload is reduced to raw bytes before the routing decision in
//! [`crate::socket`]: text is UTF-8 encoded, byte payloads pass through,
//! and blob-like payloads are read asynchronously first. The routing
//! decision for a blob happens at read-completion time, so a blob queued
//! while disconnected lands in the pending store like any other payload.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

use crate::error::Result;

/// A payload whose bytes are not yet in memory and must be read
/// asynchronously before sending.
#[async_trait]
pub trait BlobSource: Send {
    /// Consume the source and produce the full payload bytes.
    async fn read_to_bytes(self: Box<Self>) -> Result<Bytes>;
}

/// Reads a file from disk as a blob payload.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BlobSource for FileSource {
    async fn read_to_bytes(self: Box<Self>) -> Result<Bytes> {
        let data = tokio::fs::read(&self.path).await?;
        Ok(Bytes::from(data))
    }
}

/// An outbound payload accepted by [`crate::ReliableSocket::send`].
pub enum Outbound {
    /// Text payload, UTF-8 encoded before sending.
    Text(String),
    /// Raw byte payload, sent unchanged.
    Bytes(Bytes),
    /// Deferred payload read asynchronously before routing.
    Blob(Box<dyn BlobSource>),
}

impl Outbound {
    /// Normalize to raw bytes. Only the blob path suspends.
    pub(crate) async fn into_bytes(self) -> Result<Bytes> {
        match self {
            Outbound::Text(text) => Ok(Bytes::from(text.into_bytes())),
            Outbound::Bytes(bytes) => Ok(bytes),
            Outbound::Blob(source) => source.read_to_bytes().await,
        }
    }
}

impl From<&str> for Outbound {
    fn from(text: &str) -> Self {
        Outbound::Text(text.to_string())
    }
}

impl From<String> for Outbound {
    fn from(text: String) -> Self {
        Outbound::Text(text)
    }
}

impl From<Vec<u8>> for Outbound {
    fn from(bytes: Vec<u8>) -> Self {
        Outbound::Bytes(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Outbound {
    fn from(bytes: &[u8]) -> Self {
        Outbound::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<Bytes> for Outbound {
    fn from(bytes: Bytes) -> Self {
        Outbound::Bytes(bytes)
    }
}

impl From<Box<dyn BlobSource>> for Outbound {
    fn from(source: Box<dyn BlobSource>) -> Self {
        Outbound::Blob(source)
    }
}
