//! Sealed session persistence
//!
//! The session record is serialized to JSON and sealed with AES-256-GCM under
//! a per-installation key file before it touches disk. The record only ever
//! holds the public identity and bookkeeping, never key material.
//!
//! Reading is forgiving: a missing, truncated, tampered or undecryptable record
//! is reported as "no session" and removed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::Network;
use crate::util::common::{short, unix_millis};
use crate::util::fs::{remove_if_exists, write_atomic};

const SESSION_FILENAME: &str = "wallet_session.json";
const KEY_FILENAME: &str = "wallet_session.key";
const SEALED_VERSION: u8 = 1;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Persisted projection of the active wallet connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSession {
    pub public_identity: String,
    pub provider_name: String,
    pub network: Network,
    /// Unix milliseconds
    pub connected_at: i64,
    /// Unix milliseconds of the last signing or reconnect
    pub last_activity: i64,
}

impl WalletSession {
    /// Whether more than `timeout_ms` has passed since the last activity
    pub fn is_expired(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms - self.last_activity > timeout_ms
    }
}

#[derive(Serialize, Deserialize)]
struct SealedRecord {
    version: u8,
    nonce: String,
    ciphertext: String,
    sealed_at: i64,
}

/// Singleton store for the sealed session record
pub struct SessionStore {
    record_path: PathBuf,
    key_path: PathBuf,
}

impl SessionStore {
    pub fn new(storage_dir: impl AsRef<Path>) -> Self {
        let dir = storage_dir.as_ref();
        Self {
            record_path: dir.join(SESSION_FILENAME),
            key_path: dir.join(KEY_FILENAME),
        }
    }

    /// Seal and write the session, replacing any previous record
    pub fn save(&self, session: &WalletSession) -> Result<(), SessionStoreError> {
        let key = self.load_or_create_key()?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SessionStoreError::Crypto)?;

        let plaintext = serde_json::to_vec(session)
            .map_err(|e| SessionStoreError::Serialization(e.to_string()))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|_| SessionStoreError::Crypto)?;

        let record = SealedRecord {
            version: SEALED_VERSION,
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
            sealed_at: unix_millis(),
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| SessionStoreError::Serialization(e.to_string()))?;

        write_atomic(&self.record_path, &json)
            .map_err(|e| SessionStoreError::Io(format!("Failed to write session: {}", e)))?;
        tracing::debug!("💾 Session for {} sealed", short(&session.public_identity));
        Ok(())
    }

    /// Read the session, if a valid one exists
    pub fn load(&self) -> Option<WalletSession> {
        if !self.record_path.exists() {
            return None;
        }

        match self.unseal() {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("🗑️ Discarding unreadable session record: {}", e);
                if let Err(e) = self.clear() {
                    tracing::warn!("Failed to remove session record: {}", e);
                }
                None
            }
        }
    }

    /// Remove the record (idempotent). The key file stays.
    pub fn clear(&self) -> Result<(), SessionStoreError> {
        remove_if_exists(&self.record_path)
            .map_err(|e| SessionStoreError::Io(format!("Failed to remove session: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.record_path.exists()
    }

    fn unseal(&self) -> Result<WalletSession, SessionStoreError> {
        let raw = fs::read(&self.record_path)
            .map_err(|e| SessionStoreError::Io(format!("Failed to read session: {}", e)))?;
        let record: SealedRecord = serde_json::from_slice(&raw)
            .map_err(|e| SessionStoreError::Serialization(e.to_string()))?;
        if record.version != SEALED_VERSION {
            return Err(SessionStoreError::Serialization(format!(
                "unsupported session version {}",
                record.version
            )));
        }

        let key = self.read_key()?.ok_or(SessionStoreError::Crypto)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SessionStoreError::Crypto)?;
        let nonce_raw = BASE64
            .decode(record.nonce.as_bytes())
            .map_err(|_| SessionStoreError::Crypto)?;
        if nonce_raw.len() != NONCE_LEN {
            return Err(SessionStoreError::Crypto);
        }
        let ciphertext = BASE64
            .decode(record.ciphertext.as_bytes())
            .map_err(|_| SessionStoreError::Crypto)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_raw), ciphertext.as_ref())
            .map_err(|_| SessionStoreError::Crypto)?;

        serde_json::from_slice(&plaintext).map_err(|e| SessionStoreError::Serialization(e.to_string()))
    }

    fn read_key(&self) -> Result<Option<[u8; KEY_LEN]>, SessionStoreError> {
        if !self.key_path.exists() {
            return Ok(None);
        }
        let encoded = fs::read_to_string(&self.key_path)
            .map_err(|e| SessionStoreError::Io(format!("Failed to read session key: {}", e)))?;
        let decoded = match BASE64.decode(encoded.trim().as_bytes()) {
            Ok(decoded) if decoded.len() == KEY_LEN => decoded,
            _ => return Ok(None),
        };
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&decoded);
        Ok(Some(key))
    }

    fn load_or_create_key(&self) -> Result<[u8; KEY_LEN], SessionStoreError> {
        if let Some(key) = self.read_key()? {
            return Ok(key);
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let encoded = BASE64.encode(key);
        // A corrupt key file is replaced; records sealed under it become unreadable
        remove_if_exists(&self.key_path)
            .map_err(|e| SessionStoreError::Io(format!("Failed to replace session key: {}", e)))?;
        write_key_file(&self.key_path, encoded.as_bytes())
            .map_err(|e| SessionStoreError::Io(format!("Failed to write session key: {}", e)))?;
        tracing::info!("🔑 Created session sealing key");
        Ok(key)
    }
}

fn write_key_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
    file.write_all(data)?;
    file.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Session store errors
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Session record could not be sealed or unsealed")]
    Crypto,
}
