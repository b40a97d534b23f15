//! Pending-payload stores
//!
//! A [`PendingStore`] buffers outbound payloads that cannot be written to
//! the transport right now: sends issued before the first connect, while
//! disconnected, or while a flush is draining the buffer. Entries keep
//! strict insertion order; the store never reorders or deduplicates.
//!
//! Exactly one store instance belongs to each socket, chosen at
//! construction time: [`MemoryStore`] for volatile buffering,
//! [`DurableStore`] for a sled-backed buffer that survives restarts.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

pub mod durable;
pub mod memory;

pub use durable::DurableStore;
pub use memory::MemoryStore;

/// A buffered outbound payload awaiting delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Raw payload bytes, already normalized.
    pub payload: Vec<u8>,
    /// Insertion time, milliseconds since the Unix epoch.
    pub queued_at_ms: u64,
}

impl PendingEntry {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload: payload.to_vec(),
            queued_at_ms: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Queue of not-yet-delivered outbound payloads.
///
/// Persistence is best-effort: `save` never fails the send path. Durable
/// implementations log write failures at warn and drop the entry rather
/// than surfacing an error to the caller.
#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Prepare the store for use. Called once before the first connection
    /// attempt; safe to call again.
    async fn init(&self) -> Result<()>;

    /// Append a payload. Never fails; see the trait docs.
    async fn save(&self, payload: Bytes);

    /// All entries in insertion order, without removing them.
    async fn get_all(&self) -> Result<Vec<PendingEntry>>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;
}
