//! Indexed event store
//!
//! Keeps every extracted [`ContractEvent`] keyed by id, with secondary indexes
//! by contract, by event type and by time. Inserts are idempotent: storing the
//! same event twice leaves one copy. Optionally mirrored to `events.json`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use super::ContractEvent;
use crate::util::common::unix_millis;
use crate::util::fs::write_atomic;

const EVENTS_FILENAME: &str = "events.json";
const EVENTS_VERSION: u32 = 1;

/// Time index key: newest sorts last
type TimeKey = (DateTime<Utc>, u32, String);

#[derive(Default)]
struct StoreState {
    events: HashMap<String, ContractEvent>,
    by_contract: HashMap<String, HashSet<String>>,
    by_type: HashMap<String, HashSet<String>>,
    by_time: BTreeSet<TimeKey>,
}

impl StoreState {
    fn insert(&mut self, event: ContractEvent) -> bool {
        if self.events.contains_key(&event.id) {
            return false;
        }
        self.by_contract
            .entry(event.contract_id.clone())
            .or_default()
            .insert(event.id.clone());
        self.by_type
            .entry(event.type_key().to_string())
            .or_default()
            .insert(event.id.clone());
        self.by_time
            .insert((event.timestamp, event.ledger_sequence, event.id.clone()));
        self.events.insert(event.id.clone(), event);
        true
    }

    fn remove(&mut self, id: &str) -> Option<ContractEvent> {
        let event = self.events.remove(id)?;
        remove_from_index(&mut self.by_contract, &event.contract_id, id);
        remove_from_index(&mut self.by_type, event.type_key(), id);
        self.by_time
            .remove(&(event.timestamp, event.ledger_sequence, event.id.clone()));
        Some(event)
    }

    /// Resolve ids to events, newest first
    fn collect(&self, ids: Option<&HashSet<String>>) -> Vec<ContractEvent> {
        let mut events: Vec<ContractEvent> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.events.get(id).cloned())
            .collect();
        events.sort_by(|a, b| {
            (b.timestamp, b.ledger_sequence, &b.id).cmp(&(a.timestamp, a.ledger_sequence, &a.id))
        });
        events
    }
}

fn remove_from_index(index: &mut HashMap<String, HashSet<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// Store of extracted contract events
pub struct EventStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
}

impl EventStore {
    /// In-memory store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            path: None,
        }
    }

    /// Store mirrored to `events.json` under `storage_dir`, reloading prior contents
    pub fn with_storage(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = storage_dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| StoreError::Io(format!("Failed to create storage directory: {}", e)))?;
        let path = dir.join(EVENTS_FILENAME);

        let mut state = StoreState::default();
        if path.exists() {
            let json = fs::read_to_string(&path)
                .map_err(|e| StoreError::Io(format!("Failed to read event store: {}", e)))?;
            let persisted: EventsPersist = serde_json::from_str(&json).map_err(|e| {
                StoreError::Serialization(format!("Failed to deserialize event store: {}", e))
            })?;
            if persisted.version != EVENTS_VERSION {
                return Err(StoreError::Serialization(format!(
                    "unsupported event store version {}",
                    persisted.version
                )));
            }
            for event in persisted.events {
                state.insert(event);
            }
            tracing::info!("📂 Loaded {} stored events", state.events.len());
        }

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut events: Vec<&ContractEvent> = state.events.values().collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        let doc = EventsPersistRef {
            version: EVENTS_VERSION,
            events,
            saved_at: unix_millis(),
        };
        let json = serde_json::to_vec(&doc).map_err(|e| {
            StoreError::Serialization(format!("Failed to serialize event store: {}", e))
        })?;
        write_atomic(path, &json)
            .map_err(|e| StoreError::Io(format!("Failed to write event store: {}", e)))
    }

    /// Insert events, skipping ids already present. Returns how many were new.
    pub async fn put(&self, events: Vec<ContractEvent>) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let inserted: Vec<String> = events
            .into_iter()
            .filter_map(|event| {
                let id = event.id.clone();
                state.insert(event).then_some(id)
            })
            .collect();

        if inserted.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.persist(&state) {
            // Memory never runs ahead of disk
            for id in &inserted {
                state.remove(id);
            }
            return Err(e);
        }
        tracing::debug!("Stored {} new event(s) (total: {})", inserted.len(), state.events.len());
        Ok(inserted.len())
    }

    pub async fn get(&self, id: &str) -> Option<ContractEvent> {
        self.state.read().await.events.get(id).cloned()
    }

    /// Events emitted by `contract_id`, newest first
    pub async fn by_contract(&self, contract_id: &str) -> Vec<ContractEvent> {
        let state = self.state.read().await;
        state.collect(state.by_contract.get(contract_id))
    }

    /// Events of one type key (`"reward"`, `"campaign"`, or a raw topic), newest first
    pub async fn by_type(&self, type_key: &str) -> Vec<ContractEvent> {
        let state = self.state.read().await;
        state.collect(state.by_type.get(type_key))
    }

    /// The `limit` most recent events, newest first
    pub async fn recent(&self, limit: usize) -> Vec<ContractEvent> {
        let state = self.state.read().await;
        state
            .by_time
            .iter()
            .rev()
            .take(limit)
            .filter_map(|(_, _, id)| state.events.get(id).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.events.is_empty()
    }

    /// Drop every stored event
    pub async fn purge(&self) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let removed = state.events.len();
        self.persist(&StoreState::default())?;
        *state = StoreState::default();
        tracing::info!("🗑️ Purged {} stored event(s)", removed);
        Ok(removed)
    }

    /// Drop the events of one contract
    pub async fn purge_contract(&self, contract_id: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let ids: Vec<String> = state
            .by_contract
            .get(contract_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        let removed: Vec<ContractEvent> = ids.iter().filter_map(|id| state.remove(id)).collect();
        if !removed.is_empty() {
            if let Err(e) = self.persist(&state) {
                for event in removed {
                    state.insert(event);
                }
                return Err(e);
            }
        }
        Ok(ids.len())
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct EventsPersist {
    version: u32,
    events: Vec<ContractEvent>,
}

#[derive(Serialize)]
struct EventsPersistRef<'a> {
    version: u32,
    events: Vec<&'a ContractEvent>,
    saved_at: i64,
}

/// Event store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
