//! Offline transaction queue
//!
//! Durable FIFO of signed transactions that could not be submitted when they
//! were created. Nothing here resubmits on its own; the ledger client drains
//! items only when explicitly asked, so a transaction is never sent twice
//! behind the caller's back.

pub mod storage;

pub use storage::{QueueStorage, StorageError};

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::util::common::{generate_id, short, unix_millis};

/// `last_error` of an item whose resubmit was cut short by a restart
pub const INTERRUPTED: &str = "interrupted";

/// Lifecycle of a queued transaction.
///
/// `Pending → Retrying → (removed on success | Failed)`; `Failed` items may be
/// retried again or discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Retrying,
    Failed,
}

/// Signed transaction waiting for connectivity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTransaction {
    pub id: String,
    /// Base64 signed envelope, exactly as returned by the wallet
    pub signed_payload: String,
    pub status: QueueStatus,
    /// Unix milliseconds when queued
    pub timestamp: i64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueuedTransaction {
    pub fn new(signed_payload: String) -> Self {
        Self {
            id: generate_id(),
            signed_payload,
            status: QueueStatus::Pending,
            timestamp: unix_millis(),
            attempts: 0,
            last_error: None,
        }
    }
}

/// Durable FIFO of offline transactions
pub struct OfflineQueue {
    items: RwLock<VecDeque<QueuedTransaction>>,
    storage: Option<QueueStorage>,
}

impl OfflineQueue {
    /// In-memory queue (nothing survives a restart)
    pub fn new() -> Self {
        Self {
            items: RwLock::new(VecDeque::new()),
            storage: None,
        }
    }

    /// Queue persisted under `storage_dir`, reloading what was saved before
    pub fn with_storage(storage_dir: impl AsRef<Path>) -> Result<Self, QueueError> {
        let storage = QueueStorage::new(storage_dir)?;
        let mut items = storage.load()?;

        // A resubmit cut short by a restart may or may not have landed; park
        // it as failed so the caller decides whether to retry it.
        let mut interrupted = 0;
        for tx in items.iter_mut().filter(|tx| tx.status == QueueStatus::Retrying) {
            tx.status = QueueStatus::Failed;
            tx.last_error = Some(INTERRUPTED.to_string());
            interrupted += 1;
        }
        if interrupted > 0 {
            tracing::warn!("⚠️ {} offline transaction(s) were mid-resubmit at shutdown", interrupted);
            storage.save(&items)?;
        }

        Ok(Self {
            items: RwLock::new(items),
            storage: Some(storage),
        })
    }

    fn persist(&self, items: &VecDeque<QueuedTransaction>) -> Result<(), QueueError> {
        if let Some(storage) = &self.storage {
            storage.save(items)?;
        }
        Ok(())
    }

    /// Append a signed transaction; returns its queue id
    pub async fn enqueue(&self, signed_payload: String) -> Result<String, QueueError> {
        let tx = QueuedTransaction::new(signed_payload);
        let id = tx.id.clone();

        let mut items = self.items.write().await;
        items.push_back(tx);
        if let Err(e) = self.persist(&items) {
            items.pop_back();
            return Err(e);
        }

        tracing::info!("📥 Queued offline transaction {} (queue size: {})", short(&id), items.len());
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<QueuedTransaction> {
        self.items.read().await.iter().find(|tx| tx.id == id).cloned()
    }

    /// Snapshot of every queued item, oldest first
    pub async fn list(&self) -> Vec<QueuedTransaction> {
        self.items.read().await.iter().cloned().collect()
    }

    /// Oldest item still waiting (`Pending`)
    pub async fn peek_pending(&self) -> Option<QueuedTransaction> {
        self.items
            .read()
            .await
            .iter()
            .find(|tx| tx.status == QueueStatus::Pending)
            .cloned()
    }

    /// Move an item to `Retrying` and count the attempt.
    /// Items already `Retrying` are refused so one payload is never in flight twice.
    pub async fn begin_retry(&self, id: &str) -> Result<QueuedTransaction, QueueError> {
        let mut items = self.items.write().await;
        let tx = items
            .iter_mut()
            .find(|tx| tx.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if tx.status == QueueStatus::Retrying {
            return Err(QueueError::InFlight(id.to_string()));
        }
        let previous = tx.status;
        tx.status = QueueStatus::Retrying;
        tx.attempts += 1;
        let snapshot = tx.clone();

        if let Err(e) = self.persist(&items) {
            if let Some(tx) = items.iter_mut().find(|tx| tx.id == id) {
                tx.status = previous;
                tx.attempts -= 1;
            }
            return Err(e);
        }
        Ok(snapshot)
    }

    /// Mark an item as terminally failed
    pub async fn mark_failed(&self, id: &str, error: String) -> Result<(), QueueError> {
        let mut items = self.items.write().await;
        let tx = items
            .iter_mut()
            .find(|tx| tx.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        tracing::warn!("❌ Offline transaction {} failed: {}", short(id), error);
        tx.status = QueueStatus::Failed;
        tx.last_error = Some(error);
        self.persist(&items)
    }

    /// Remove an item (resolved or discarded)
    pub async fn remove(&self, id: &str) -> Result<QueuedTransaction, QueueError> {
        let mut items = self.items.write().await;
        let position = items
            .iter()
            .position(|tx| tx.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        let removed = items
            .remove(position)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        self.persist(&items)?;

        tracing::debug!("Removed offline transaction {} (remaining: {})", short(id), items.len());
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Offline queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queued transaction not found: {0}")]
    NotFound(String),

    #[error("Queued transaction {0} is already being resubmitted")]
    InFlight(String),

    #[error("Queue storage error: {0}")]
    Storage(#[from] StorageError),
}
