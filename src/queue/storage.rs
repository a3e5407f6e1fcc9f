//! Offline queue persistence
//!
//! Saves the queue to a single JSON document with atomic writes so queued
//! transactions survive app restarts.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::QueuedTransaction;
use crate::util::common::unix_millis;
use crate::util::fs::write_atomic;

const QUEUE_FILENAME: &str = "offline_queue.json";
const QUEUE_VERSION: u32 = 1;

/// Queue storage manager
pub struct QueueStorage {
    /// Base directory for queue storage
    storage_dir: PathBuf,
}

impl QueueStorage {
    /// Create new queue storage manager
    pub fn new(storage_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();

        if !storage_dir.exists() {
            fs::create_dir_all(&storage_dir).map_err(|e| {
                StorageError::IoError(format!("Failed to create storage directory: {}", e))
            })?;
        }

        Ok(Self { storage_dir })
    }

    fn queue_path(&self) -> PathBuf {
        self.storage_dir.join(QUEUE_FILENAME)
    }

    /// Save the queue to disk (atomic write)
    pub fn save(&self, items: &VecDeque<QueuedTransaction>) -> Result<(), StorageError> {
        let path = self.queue_path();
        let persistable = OfflineQueuePersist {
            version: QUEUE_VERSION,
            items: items.iter().cloned().collect(),
            saved_at: unix_millis(),
        };

        let json = serde_json::to_string_pretty(&persistable).map_err(|e| {
            StorageError::SerializationError(format!("Failed to serialize offline queue: {}", e))
        })?;

        write_atomic(&path, json.as_bytes())
            .map_err(|e| StorageError::IoError(format!("Failed to write offline queue: {}", e)))?;

        tracing::debug!("Saved offline queue ({} items) to {}", items.len(), path.display());
        Ok(())
    }

    /// Load the queue from disk; a missing file is an empty queue
    pub fn load(&self) -> Result<VecDeque<QueuedTransaction>, StorageError> {
        let path = self.queue_path();

        if !path.exists() {
            tracing::debug!("No saved offline queue found, starting fresh");
            return Ok(VecDeque::new());
        }

        let json = fs::read_to_string(&path)
            .map_err(|e| StorageError::IoError(format!("Failed to read offline queue: {}", e)))?;

        let persistable: OfflineQueuePersist = serde_json::from_str(&json).map_err(|e| {
            StorageError::DeserializationError(format!("Failed to deserialize offline queue: {}", e))
        })?;

        if persistable.version != QUEUE_VERSION {
            return Err(StorageError::CorruptedFile(format!(
                "unsupported offline queue version {}",
                persistable.version
            )));
        }

        tracing::info!("📂 Loaded offline queue: {} transactions", persistable.items.len());
        Ok(persistable.items.into())
    }
}

/// Persistable offline queue
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OfflineQueuePersist {
    version: u32,
    items: Vec<QueuedTransaction>,
    saved_at: i64,
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Corrupted file: {0}")]
    CorruptedFile(String),
}
