//! Durable pending store backed by sled
//!
//! Entries live in a dedicated tree, keyed by a monotonic big-endian
//! counter so sled's key order equals insertion order. Values are
//! msgpack-encoded [`PendingEntry`] records.
//!
//! Writes are best-effort: a failed or pre-init `save` is logged at warn
//! and swallowed so persistence trouble never crashes the send path.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use super::{PendingEntry, PendingStore};
use crate::error::Result;

/// Tree holding the buffered payloads.
const TREE_NAME: &str = "pending-payloads";

struct Opened {
    // Keeps the database alive for the tree handle.
    _db: sled::Db,
    tree: sled::Tree,
    next_key: u64,
}

/// Sled-backed pending store. Survives process restarts.
pub struct DurableStore {
    path: PathBuf,
    opened: Mutex<Option<Opened>>,
}

impl DurableStore {
    /// Create a store rooted at `path`. The database is not opened until
    /// [`PendingStore::init`] runs.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            opened: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PendingStore for DurableStore {
    async fn init(&self) -> Result<()> {
        let mut opened = self.opened.lock().unwrap();
        if opened.is_some() {
            return Ok(());
        }

        let db = sled::open(&self.path)?;
        // open_tree creates the tree on first use, so a missing record
        // container needs no schema-version dance here.
        let tree = db.open_tree(TREE_NAME)?;
        let next_key = match tree.last()? {
            Some((key, _)) => decode_key(&key) + 1,
            None => 0,
        };

        info!(path = %self.path.display(), entries = tree.len(), "Opened pending buffer");

        *opened = Some(Opened {
            _db: db,
            tree,
            next_key,
        });
        Ok(())
    }

    async fn save(&self, payload: Bytes) {
        let mut opened = self.opened.lock().unwrap();
        let Some(state) = opened.as_mut() else {
            warn!("Pending buffer save before init, payload dropped from durable backing");
            return;
        };

        let entry = PendingEntry::new(payload);
        let value = match rmp_serde::to_vec(&entry) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to encode pending entry");
                return;
            }
        };

        let key = state.next_key.to_be_bytes();
        state.next_key += 1;
        if let Err(e) = state.tree.insert(key, value) {
            warn!(error = %e, "Pending buffer save failed");
        }
    }

    async fn get_all(&self) -> Result<Vec<PendingEntry>> {
        let opened = self.opened.lock().unwrap();
        let Some(state) = opened.as_ref() else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for item in state.tree.iter() {
            let (_, value) = item?;
            entries.push(rmp_serde::from_slice(&value)?);
        }
        Ok(entries)
    }

    async fn clear(&self) -> Result<()> {
        let mut opened = self.opened.lock().unwrap();
        let Some(state) = opened.as_mut() else {
            return Ok(());
        };

        state.tree.clear()?;
        state.tree.flush()?;
        state.next_key = 0;
        Ok(())
    }
}

fn decode_key(key: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = key.len().min(8);
    buf[8 - len..].copy_from_slice(&key[..len]);
    u64::from_be_bytes(buf)
}
