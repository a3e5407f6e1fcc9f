//! LedgerLink SDK - wallet sessions and ledger connectivity for contract-driven apps
//!
//! The SDK connects to an externally injected wallet provider, keeps a single
//! timed session with it, and talks to a ledger network through a pool of
//! redundant endpoints: fee estimation, retried submission, offline queueing,
//! live account activity, contract simulation/invocation and event indexing.
//! It never holds key material; every signature comes from the provider.

pub mod config;
pub mod contract;
pub mod events;
pub mod ledger;
pub mod provider;
pub mod queue;
pub mod session;
pub mod util;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use config::{ConfigError, SdkConfig};
use contract::{ContractInvocationRequest, ContractInvocationResult, ContractService, InvocationKind, SimulationResult};
use events::{ContractEvent, EventStore, StoreError, TransactionMeta};
use ledger::{
    ActivityHandler, ConfirmationPolicy, FeeEstimate, LedgerClient, LedgerError, LedgerRpc,
    NetworkEndpointSet, RpcError, SubmissionReceipt, Subscription,
};
use provider::{ProviderInfo, ProviderRegistry};
use queue::{OfflineQueue, QueueError, QueuedTransaction};
use session::{SessionError, SessionManager, SessionState, WalletConnection, WalletSession};

/// Core LedgerLink SDK instance
pub struct LedgerLinkSDK {
    config: SdkConfig,
    /// Wallet connection and signing
    sessions: SessionManager,
    /// Endpoint pool, fees, submission and streams
    ledger: Arc<LedgerClient>,
    /// Simulate / invoke pipeline
    contracts: ContractService,
    /// Indexed contract events
    events: Arc<EventStore>,
}

impl LedgerLinkSDK {
    /// Wire the SDK around caller-supplied ledger endpoints.
    ///
    /// Persisted state (session record, offline queue, event store) lives
    /// under `config.storage_dir` and is reloaded here.
    pub fn new(
        config: SdkConfig,
        providers: ProviderRegistry,
        rpcs: Vec<Arc<dyn LedgerRpc>>,
    ) -> Result<Self, LedgerLinkError> {
        config.validate_policies()?;

        let endpoints = NetworkEndpointSet::new(config.network.clone(), rpcs)
            .ok_or_else(|| LedgerLinkError::Configuration("no ledger endpoints".to_string()))?;

        let queue = Arc::new(OfflineQueue::with_storage(&config.storage_dir)?);
        let events = Arc::new(EventStore::with_storage(&config.storage_dir)?);

        let ledger = Arc::new(LedgerClient::new(
            endpoints,
            config.fees.clone(),
            config.retry.clone(),
            ConfirmationPolicy::from(&config.contract),
            queue,
        ));
        let contracts = ContractService::new(ledger.clone(), events.clone(), config.contract.clone());
        let sessions = SessionManager::new(providers, &config.storage_dir, config.session.clone());

        tracing::info!(
            "🚀 LedgerLink SDK ready on {} (storage: {})",
            config.network,
            config.storage_dir.display()
        );

        Ok(Self {
            config,
            sessions,
            ledger,
            contracts,
            events,
        })
    }

    /// Wire the SDK with one HTTP JSON-RPC client per configured endpoint
    #[cfg(feature = "rpc-client")]
    pub fn from_config(config: SdkConfig, providers: ProviderRegistry) -> Result<Self, LedgerLinkError> {
        config.validate()?;

        let rpcs = config
            .endpoints
            .iter()
            .map(|url| {
                ledger::http::JsonRpcClient::new(url.as_str())
                    .map(|client| Arc::new(client) as Arc<dyn LedgerRpc>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(config, providers, rpcs)
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    pub fn contracts(&self) -> &ContractService {
        &self.contracts
    }

    pub fn event_store(&self) -> &EventStore {
        &self.events
    }

    // ===== Wallet =====

    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.sessions.list_providers()
    }

    /// Connect through `provider_name` on the configured network
    pub async fn connect(&self, provider_name: &str) -> Result<WalletConnection, SessionError> {
        self.sessions.connect(provider_name, &self.config.network).await
    }

    pub async fn disconnect(&self) {
        self.sessions.disconnect().await
    }

    pub async fn switch_provider(&self, provider_name: &str) -> Result<WalletConnection, SessionError> {
        self.sessions
            .switch_provider(provider_name, &self.config.network)
            .await
    }

    pub async fn restore_session(&self) -> bool {
        self.sessions.restore_session().await
    }

    pub async fn sign_transaction(&self, payload: &str) -> Result<String, SessionError> {
        self.sessions.sign_transaction(payload).await
    }

    pub async fn sign_auth_challenge(&self, challenge: &str) -> Result<String, SessionError> {
        self.sessions.sign_auth_challenge(challenge).await
    }

    pub async fn connection(&self) -> Option<WalletConnection> {
        self.sessions.connection().await
    }

    pub fn session_state(&self) -> SessionState {
        self.sessions.state()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.sessions.subscribe()
    }

    pub fn session_info(&self) -> Option<WalletSession> {
        self.sessions.session_info()
    }

    // ===== Ledger =====

    /// Total fee for `operation_count` operations; never below nominal
    pub async fn estimate_fee(&self, operation_count: u32) -> u64 {
        self.ledger.estimate_fee(operation_count).await
    }

    pub async fn fee_estimate(&self) -> FeeEstimate {
        self.ledger.fee_estimate().await
    }

    /// Submit a signed transaction with the configured retry policy
    pub async fn submit(&self, signed_envelope: &str) -> Result<SubmissionReceipt, LedgerError> {
        self.ledger.submit_default(signed_envelope).await
    }

    pub async fn queue_for_offline(&self, signed_envelope: String) -> Result<String, LedgerError> {
        self.ledger.queue_for_offline(signed_envelope).await
    }

    pub async fn resubmit_queued(&self, id: &str) -> Result<SubmissionReceipt, LedgerError> {
        self.ledger.resubmit_queued(id).await
    }

    pub async fn queued_transactions(&self) -> Vec<QueuedTransaction> {
        self.ledger.queued().await
    }

    pub async fn discard_queued(&self, id: &str) -> Result<QueuedTransaction, LedgerError> {
        self.ledger.discard_queued(id).await
    }

    pub fn stream_account_activity(&self, account_id: &str, handler: ActivityHandler) -> Subscription {
        self.ledger.stream_account_activity(account_id, handler)
    }

    // ===== Contracts =====

    /// Dry-run `request` as the connected identity
    pub async fn simulate(&self, request: &ContractInvocationRequest) -> Result<SimulationResult, LedgerLinkError> {
        let source = self.require_identity().await?;
        Ok(self.contracts.simulate(request, &source).await)
    }

    /// Invoke `request` as the connected identity. State-changing calls are
    /// signed through the active session.
    pub async fn invoke(
        &self,
        request: &ContractInvocationRequest,
        kind: InvocationKind,
    ) -> Result<ContractInvocationResult, LedgerLinkError> {
        let source = self.require_identity().await?;
        Ok(self
            .contracts
            .invoke(request, &source, kind, Some(&self.sessions))
            .await)
    }

    /// Parse events out of transaction metadata without storing them
    pub fn extract_events(&self, meta: &TransactionMeta, contract_id: &str) -> Vec<ContractEvent> {
        events::extract_events(meta, contract_id)
    }

    pub async fn events_by_contract(&self, contract_id: &str) -> Vec<ContractEvent> {
        self.events.by_contract(contract_id).await
    }

    pub async fn events_by_type(&self, type_key: &str) -> Vec<ContractEvent> {
        self.events.by_type(type_key).await
    }

    pub async fn recent_events(&self, limit: usize) -> Vec<ContractEvent> {
        self.events.recent(limit).await
    }

    /// Drop every stored event. Returns how many were removed.
    pub async fn purge_events(&self) -> Result<usize, LedgerLinkError> {
        Ok(self.events.purge().await?)
    }

    /// Close streams and stop session timers. The persisted session is kept.
    pub async fn shutdown(&self) {
        let closed = self.ledger.shutdown();
        self.sessions.shutdown().await;
        tracing::info!("👋 LedgerLink SDK shut down ({} stream(s) closed)", closed);
    }

    async fn require_identity(&self) -> Result<String, LedgerLinkError> {
        self.sessions
            .public_identity()
            .await
            .ok_or(LedgerLinkError::Session(SessionError::NotConnected))
    }
}

/// Error types for LedgerLink operations
#[derive(Error, Debug)]
pub enum LedgerLinkError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Offline queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Event store error: {0}")]
    Events(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
