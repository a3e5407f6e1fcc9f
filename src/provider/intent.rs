//! Intent-style provider
//!
//! The provider kit is not present up front: an [`IntentLoader`] fetches it on
//! first use, after which every request opens an out-of-band UI flow (a
//! redirect, a QR hand-off, a popup) and resolves when the user finishes it.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::OnceCell;

use super::{normalize_failure, ProviderError, ProviderKind, WalletProvider};
use crate::ledger::Network;
use crate::util::common::short;

/// How an out-of-band flow ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentOutcome {
    /// Flow finished with a result (identity, signed payload or signature)
    Completed(String),
    /// User closed or backed out of the flow
    Cancelled,
    Failed { code: Option<i64>, message: String },
}

impl IntentOutcome {
    /// Collapse the flow outcome into the provider result
    pub fn into_result(self) -> Result<String, ProviderError> {
        match self {
            IntentOutcome::Completed(value) => Ok(value),
            IntentOutcome::Cancelled => Err(ProviderError::UserRejected),
            IntentOutcome::Failed { code, message } => Err(normalize_failure(code, &message)),
        }
    }
}

/// Loaded provider kit
#[async_trait]
pub trait IntentKit: Send + Sync {
    async fn open_connect_flow(&self, network_passphrase: &str) -> IntentOutcome;

    async fn open_sign_flow(
        &self,
        payload: &str,
        network_passphrase: &str,
        address: &str,
    ) -> IntentOutcome;

    async fn open_auth_flow(
        &self,
        challenge: &str,
        network_passphrase: &str,
        address: &str,
    ) -> IntentOutcome;

    /// Tear down any provider-side session state
    async fn close(&self) {}
}

/// Fetches the provider kit (e.g. a remote script) on demand
#[async_trait]
pub trait IntentLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn IntentKit>, ProviderError>;
}

/// Provider adapter for lazily loaded, flow-driven wallets
pub struct IntentProvider {
    name: String,
    loader: Arc<dyn IntentLoader>,
    kit: OnceCell<Arc<dyn IntentKit>>,
    identity: RwLock<Option<String>>,
}

impl IntentProvider {
    pub fn new(name: impl Into<String>, loader: Arc<dyn IntentLoader>) -> Self {
        Self {
            name: name.into(),
            loader,
            kit: OnceCell::new(),
            identity: RwLock::new(None),
        }
    }

    async fn kit(&self) -> Result<Arc<dyn IntentKit>, ProviderError> {
        self.kit
            .get_or_try_init(|| async {
                tracing::info!("📦 Loading provider kit for {}", self.name);
                self.loader.load().await
            })
            .await
            .cloned()
    }

    fn connected_identity(&self) -> Result<String, ProviderError> {
        self.identity.read().clone().ok_or(ProviderError::NotConnected)
    }
}

#[async_trait]
impl WalletProvider for IntentProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Intent
    }

    fn is_available(&self) -> bool {
        self.kit.initialized()
    }

    async fn load(&self) -> Result<(), ProviderError> {
        self.kit().await.map(|_| ())
    }

    async fn connect(&self, network: &Network) -> Result<String, ProviderError> {
        let kit = self.kit().await?;
        let identity = kit
            .open_connect_flow(network.passphrase())
            .await
            .into_result()?;

        tracing::debug!("{} flow granted {}", self.name, short(&identity));
        *self.identity.write() = Some(identity.clone());
        Ok(identity)
    }

    async fn disconnect(&self) {
        self.identity.write().take();
        if let Some(kit) = self.kit.get() {
            kit.close().await;
        }
    }

    fn current_identity(&self) -> Option<String> {
        self.identity.read().clone()
    }

    async fn sign_transaction(
        &self,
        payload: &str,
        network: &Network,
    ) -> Result<String, ProviderError> {
        let kit = self.kit().await?;
        let address = self.connected_identity()?;
        kit.open_sign_flow(payload, network.passphrase(), &address)
            .await
            .into_result()
    }

    async fn sign_auth_challenge(
        &self,
        challenge: &str,
        network: &Network,
    ) -> Result<String, ProviderError> {
        let kit = self.kit().await?;
        let address = self.connected_identity()?;
        kit.open_auth_flow(challenge, network.passphrase(), &address)
            .await
            .into_result()
    }
}
