//! Volatile in-process pending store

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;

use super::{PendingEntry, PendingStore};
use crate::error::Result;

/// In-memory pending store. Contents are lost when the process ends.
pub struct MemoryStore {
    entries: Mutex<Vec<PendingEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PendingStore for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn save(&self, payload: Bytes) {
        self.entries.lock().unwrap().push(PendingEntry::new(payload));
    }

    async fn get_all(&self) -> Result<Vec<PendingEntry>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}
