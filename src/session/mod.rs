//! Wallet connection and session management
//!
//! [`SessionManager`] owns the single active wallet connection. It is the only
//! writer of that state; everything else reads it through the manager and
//! re-reads it after every suspension point, since a timeout or disconnect can
//! clear it at any time.
//!
//! State machine: `Idle → Connecting → Connected → Idle` on disconnect or
//! timeout, `Connecting → Idle` on failure.
//!
//! Inactivity is enforced twice: a one-shot timer re-armed on every signing
//! request, and a periodic watchdog that also checks the persisted record.

pub mod store;
pub mod timer;

pub use store::{SessionStore, SessionStoreError, WalletSession};
pub use timer::ScheduledTask;

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::ledger::Network;
use crate::provider::{ProviderError, ProviderInfo, ProviderRegistry, WalletProvider};
use crate::util::common::{short, unix_millis};

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
}

/// The active wallet connection. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConnection {
    pub public_identity: String,
    pub provider_name: String,
    pub network: Network,
    pub connected_at: DateTime<Utc>,
}

struct ActiveConnection {
    connection: WalletConnection,
    provider: Arc<dyn WalletProvider>,
    last_activity: Instant,
    /// Distinguishes this connection from any later one
    epoch: u64,
}

struct Inner {
    registry: ProviderRegistry,
    store: SessionStore,
    config: SessionConfig,
    active: RwLock<Option<ActiveConnection>>,
    state_tx: watch::Sender<SessionState>,
    /// Serializes connect/restore/switch
    connect_lock: Mutex<()>,
    /// One signing request in flight at a time
    sign_lock: Mutex<()>,
    inactivity_timer: ScheduledTask,
    watchdog: ScheduledTask,
    next_epoch: AtomicU64,
}

/// Owner of the active wallet connection
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager persisting its session under `storage_dir`
    pub fn new(
        registry: ProviderRegistry,
        storage_dir: impl AsRef<Path>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);

        Self {
            inner: Arc::new(Inner {
                registry,
                store: SessionStore::new(storage_dir),
                config,
                active: RwLock::new(None),
                state_tx,
                connect_lock: Mutex::new(()),
                sign_lock: Mutex::new(()),
                inactivity_timer: ScheduledTask::new(),
                watchdog: ScheduledTask::new(),
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    /// Known providers and whether each is installed. No side effects.
    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.inner.registry.list()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch lifecycle changes, including timeout-driven disconnects
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// The active connection, if any
    pub async fn connection(&self) -> Option<WalletConnection> {
        self.inner
            .active
            .read()
            .await
            .as_ref()
            .map(|a| a.connection.clone())
    }

    pub async fn public_identity(&self) -> Option<String> {
        self.connection().await.map(|c| c.public_identity)
    }

    /// The persisted session record, if a valid one exists
    pub fn session_info(&self) -> Option<WalletSession> {
        self.inner.store.load()
    }

    /// Connect through `provider_name` on `network`.
    ///
    /// An existing connection is closed first, so at most one is ever active.
    pub async fn connect(
        &self,
        provider_name: &str,
        network: &Network,
    ) -> Result<WalletConnection, SessionError> {
        let _guard = self.inner.connect_lock.lock().await;
        self.inner.connect_locked(provider_name, network).await
    }

    /// Close the active connection. Safe to call when nothing is connected.
    pub async fn disconnect(&self) {
        self.inner.disconnect("requested").await;
    }

    /// Disconnect, then connect through another provider.
    /// If the new connect fails the manager is left `Idle`.
    pub async fn switch_provider(
        &self,
        provider_name: &str,
        network: &Network,
    ) -> Result<WalletConnection, SessionError> {
        let _guard = self.inner.connect_lock.lock().await;
        tracing::info!("🔀 Switching wallet provider to {}", provider_name);
        self.inner.disconnect("provider switch").await;
        self.inner.connect_locked(provider_name, network).await
    }

    /// Re-establish the persisted session at startup.
    ///
    /// Returns true only if the session was fresh, the same provider
    /// reconnected, and it reported exactly the persisted identity.
    pub async fn restore_session(&self) -> bool {
        let _guard = self.inner.connect_lock.lock().await;
        self.inner.restore_locked().await
    }

    /// Sign a transaction payload with the active connection
    pub async fn sign_transaction(&self, payload: &str) -> Result<String, SessionError> {
        self.inner.sign(SignRequest::Transaction(payload)).await
    }

    /// Sign an authentication challenge with the active connection
    pub async fn sign_auth_challenge(&self, challenge: &str) -> Result<String, SessionError> {
        self.inner.sign(SignRequest::AuthChallenge(challenge)).await
    }

    /// Cancel timers and drop the connection without touching the persisted
    /// session, so it can be restored on the next start.
    pub async fn shutdown(&self) {
        self.inner.inactivity_timer.cancel();
        self.inner.watchdog.cancel();
        if self.inner.active.write().await.take().is_some() {
            self.inner.state_tx.send_replace(SessionState::Idle);
        }
    }
}

enum SignRequest<'a> {
    Transaction(&'a str),
    AuthChallenge(&'a str),
}

impl Inner {
    fn timeout_ms(&self) -> i64 {
        self.config.inactivity_timeout().as_millis() as i64
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!("Session state {:?} → {:?}", previous, state);
        }
    }

    async fn connect_locked(
        self: &Arc<Self>,
        provider_name: &str,
        network: &Network,
    ) -> Result<WalletConnection, SessionError> {
        let provider = self
            .registry
            .find(provider_name)
            .ok_or_else(|| SessionError::NotInstalled(provider_name.to_string()))?;

        if provider.load().await.is_err() || !provider.is_available() {
            tracing::warn!("❌ Wallet provider {} is not installed", provider_name);
            return Err(SessionError::NotInstalled(provider_name.to_string()));
        }

        if self.active.read().await.is_some() {
            self.disconnect("replaced by new connection").await;
        }

        self.set_state(SessionState::Connecting);
        tracing::info!("🔗 Connecting to {} on {}", provider.name(), network);

        let identity = match provider.connect(network).await {
            Ok(identity) => identity,
            Err(e) => {
                self.set_state(SessionState::Idle);
                tracing::warn!("❌ Connection to {} failed: {}", provider.name(), e);
                return Err(SessionError::from_connect(provider.name(), e));
            }
        };

        let now = unix_millis();
        let connection = WalletConnection {
            public_identity: identity,
            provider_name: provider.name().to_string(),
            network: network.clone(),
            connected_at: from_millis(now),
        };
        self.establish(provider, connection.clone(), now).await?;
        Ok(connection)
    }

    async fn restore_locked(self: &Arc<Self>) -> bool {
        if self.active.read().await.is_some() {
            return true;
        }

        let Some(session) = self.store.load() else {
            tracing::debug!("No persisted session to restore");
            return false;
        };

        if session.is_expired(unix_millis(), self.timeout_ms()) {
            tracing::info!("⌛ Persisted session for {} expired", short(&session.public_identity));
            self.clear_store();
            return false;
        }

        let Some(provider) = self.registry.find(&session.provider_name) else {
            tracing::warn!("Provider {} of persisted session is unknown", session.provider_name);
            return false;
        };
        if provider.load().await.is_err() || !provider.is_available() {
            tracing::warn!("Provider {} of persisted session is not installed", session.provider_name);
            return false;
        }

        self.set_state(SessionState::Connecting);
        let identity = match provider.connect(&session.network).await {
            Ok(identity) => identity,
            Err(e) => {
                self.set_state(SessionState::Idle);
                tracing::warn!("❌ Could not restore session through {}: {}", provider.name(), e);
                return false;
            }
        };

        if identity != session.public_identity {
            tracing::warn!(
                "⚠️ Provider {} switched accounts ({} → {}), not restoring",
                provider.name(),
                short(&session.public_identity),
                short(&identity)
            );
            provider.disconnect().await;
            self.clear_store();
            self.set_state(SessionState::Idle);
            return false;
        }

        let connection = WalletConnection {
            public_identity: identity,
            provider_name: provider.name().to_string(),
            network: session.network.clone(),
            connected_at: from_millis(session.connected_at),
        };
        match self.establish(provider, connection, session.connected_at).await {
            Ok(()) => {
                tracing::info!("♻️ Restored session for {}", short(&session.public_identity));
                true
            }
            Err(e) => {
                tracing::warn!("Failed to persist restored session: {}", e);
                false
            }
        }
    }

    /// Persist, publish and arm timers for a freshly connected provider
    async fn establish(
        self: &Arc<Self>,
        provider: Arc<dyn WalletProvider>,
        connection: WalletConnection,
        connected_at_ms: i64,
    ) -> Result<(), SessionError> {
        let now = unix_millis();
        let record = WalletSession {
            public_identity: connection.public_identity.clone(),
            provider_name: connection.provider_name.clone(),
            network: connection.network.clone(),
            connected_at: connected_at_ms,
            last_activity: now,
        };
        if let Err(e) = self.store.save(&record) {
            provider.disconnect().await;
            self.set_state(SessionState::Idle);
            return Err(SessionError::ConnectionFailed(format!(
                "session could not be persisted: {}",
                e
            )));
        }

        let identity = connection.public_identity.clone();
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        *self.active.write().await = Some(ActiveConnection {
            connection,
            provider,
            last_activity: Instant::now(),
            epoch,
        });
        self.set_state(SessionState::Connected);
        self.arm_inactivity_timer();
        self.start_watchdog();

        tracing::info!("✅ Wallet {} connected", short(&identity));
        Ok(())
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear session record: {}", e);
        }
    }

    async fn disconnect(&self, reason: &str) {
        let previous = self.active.write().await.take();
        self.clear_store();
        self.set_state(SessionState::Idle);

        if let Some(active) = previous {
            active.provider.disconnect().await;
            tracing::info!(
                "🔌 Wallet {} disconnected ({})",
                short(&active.connection.public_identity),
                reason
            );
        }

        self.inactivity_timer.cancel();
        self.watchdog.cancel();
    }

    fn arm_inactivity_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.inactivity_timeout();
        self.inactivity_timer.schedule_once(timeout, async move {
            // Disconnect cancels this timer; run it outside the timer task
            tokio::spawn(expire_if_idle(weak, "inactivity timeout"));
        });
    }

    fn start_watchdog(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.watchdog
            .schedule_every(self.config.watchdog_interval(), move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if inner.watchdog_should_expire().await {
                        // Disconnect cancels the watchdog itself
                        tokio::spawn(async move { inner.disconnect("watchdog").await });
                    }
                }
            });
    }

    /// The watchdog's view: in-memory idle time, then the persisted record
    async fn watchdog_should_expire(&self) -> bool {
        let guard = self.active.read().await;
        let Some(active) = guard.as_ref() else {
            return false;
        };
        if active.last_activity.elapsed() >= self.config.inactivity_timeout() {
            return true;
        }
        match self.store.load() {
            None => {
                tracing::warn!("⚠️ Session record missing while connected");
                true
            }
            Some(record) => {
                record.is_expired(unix_millis(), self.timeout_ms())
                    || record.public_identity != active.connection.public_identity
            }
        }
    }

    /// Check the session is usable and record the activity.
    /// Returns what the signing call needs.
    async fn touch(self: &Arc<Self>) -> Result<(Arc<dyn WalletProvider>, Network, u64), SessionError> {
        let mut guard = self.active.write().await;
        let Some(active) = guard.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        if active.last_activity.elapsed() >= self.config.inactivity_timeout() {
            drop(guard);
            self.disconnect("expired before signing").await;
            return Err(SessionError::SessionExpired);
        }

        active.last_activity = Instant::now();
        let record = WalletSession {
            public_identity: active.connection.public_identity.clone(),
            provider_name: active.connection.provider_name.clone(),
            network: active.connection.network.clone(),
            connected_at: active.connection.connected_at.timestamp_millis(),
            last_activity: unix_millis(),
        };
        let snapshot = (
            Arc::clone(&active.provider),
            active.connection.network.clone(),
            active.epoch,
        );

        // Still under the write guard: a concurrent disconnect clears the
        // record only after this save.
        if let Err(e) = self.store.save(&record) {
            tracing::warn!("Failed to refresh session record: {}", e);
        }
        self.arm_inactivity_timer();
        drop(guard);
        Ok(snapshot)
    }

    async fn sign(self: &Arc<Self>, request: SignRequest<'_>) -> Result<String, SessionError> {
        let _guard = self.sign_lock.lock().await;
        let (provider, network, epoch) = self.touch().await?;

        let outcome = match request {
            SignRequest::Transaction(payload) => {
                tracing::debug!("✍️ Requesting transaction signature from {}", provider.name());
                provider.sign_transaction(payload, &network).await
            }
            SignRequest::AuthChallenge(challenge) => {
                tracing::debug!("✍️ Requesting challenge signature from {}", provider.name());
                provider.sign_auth_challenge(challenge, &network).await
            }
        };

        // The connection may have gone away while the provider was busy
        let still_current = self
            .active
            .read()
            .await
            .as_ref()
            .is_some_and(|a| a.epoch == epoch);
        if !still_current {
            tracing::warn!("Discarding signature: session ended while signing");
            return Err(SessionError::SessionExpired);
        }

        outcome.map_err(|e| match e {
            ProviderError::UserRejected => SessionError::UserRejected,
            other => SessionError::SigningFailed(other.to_string()),
        })
    }
}

async fn expire_if_idle(weak: Weak<Inner>, reason: &'static str) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let idle = inner
        .active
        .read()
        .await
        .as_ref()
        .is_some_and(|a| a.last_activity.elapsed() >= inner.config.inactivity_timeout());

    // Activity since the timer fired re-armed it
    if idle {
        inner.disconnect(reason).await;
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Anything that can produce a signed transaction for the active identity
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, payload: &str) -> Result<String, SessionError>;
}

#[async_trait]
impl TransactionSigner for SessionManager {
    async fn sign(&self, payload: &str) -> Result<String, SessionError> {
        self.sign_transaction(payload).await
    }
}

/// Connection and signing error codes exposed to UI collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletErrorCode {
    NotInstalled,
    UserRejected,
    ConnectionFailed,
    SigningFailed,
    SessionExpired,
    InvalidNetwork,
    UnknownError,
}

impl WalletErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletErrorCode::NotInstalled => "NOT_INSTALLED",
            WalletErrorCode::UserRejected => "USER_REJECTED",
            WalletErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            WalletErrorCode::SigningFailed => "SIGNING_FAILED",
            WalletErrorCode::SessionExpired => "SESSION_EXPIRED",
            WalletErrorCode::InvalidNetwork => "INVALID_NETWORK",
            WalletErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for WalletErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session and signing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Wallet provider not installed: {0}")]
    NotInstalled(String),

    #[error("User rejected the request")]
    UserRejected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("No wallet connected")]
    NotConnected,

    #[error("Wallet is on network {actual}, expected {expected}")]
    InvalidNetwork { expected: String, actual: String },

    #[error("Unexpected wallet error: {0}")]
    Unknown(String),
}

impl SessionError {
    fn from_connect(provider: &str, error: ProviderError) -> Self {
        match error {
            ProviderError::UserRejected => SessionError::UserRejected,
            ProviderError::Unavailable(_) => SessionError::NotInstalled(provider.to_string()),
            ProviderError::NetworkMismatch { expected, actual } => {
                SessionError::InvalidNetwork { expected, actual }
            }
            other => SessionError::ConnectionFailed(other.to_string()),
        }
    }

    pub fn code(&self) -> WalletErrorCode {
        match self {
            SessionError::NotInstalled(_) => WalletErrorCode::NotInstalled,
            SessionError::UserRejected => WalletErrorCode::UserRejected,
            SessionError::ConnectionFailed(_) => WalletErrorCode::ConnectionFailed,
            SessionError::SigningFailed(_) => WalletErrorCode::SigningFailed,
            SessionError::SessionExpired | SessionError::NotConnected => {
                WalletErrorCode::SessionExpired
            }
            SessionError::InvalidNetwork { .. } => WalletErrorCode::InvalidNetwork,
            SessionError::Unknown(_) => WalletErrorCode::UnknownError,
        }
    }
}
