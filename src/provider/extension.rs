//! Extension-style provider
//!
//! The host injects an [`ExtensionApi`] object into a shared slot when the
//! wallet extension is present. Availability is a plain probe of that slot.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{normalize_failure, ProviderError, ProviderKind, WalletProvider};
use crate::ledger::Network;
use crate::util::common::short;

/// Failure reported by an extension, in its own terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFault {
    pub code: Option<i64>,
    pub message: String,
}

impl ExtensionFault {
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ExtensionFault> for ProviderError {
    fn from(fault: ExtensionFault) -> Self {
        normalize_failure(fault.code, &fault.message)
    }
}

/// Capability surface exposed by an injected wallet extension
#[async_trait]
pub trait ExtensionApi: Send + Sync {
    /// Prompt the user to share their public identity
    async fn request_access(&self) -> Result<String, ExtensionFault>;

    /// Passphrase of the network the extension is currently set to
    async fn get_network_passphrase(&self) -> Result<String, ExtensionFault>;

    async fn sign_transaction(
        &self,
        payload: &str,
        network_passphrase: &str,
        address: &str,
    ) -> Result<String, ExtensionFault>;

    async fn sign_auth_entry(
        &self,
        entry: &str,
        network_passphrase: &str,
        address: &str,
    ) -> Result<String, ExtensionFault>;
}

/// Where the host injects the extension object (empty when not installed)
pub type ExtensionSlot = Arc<RwLock<Option<Arc<dyn ExtensionApi>>>>;

/// Provider adapter for injected extensions
pub struct ExtensionProvider {
    name: String,
    slot: ExtensionSlot,
    identity: RwLock<Option<String>>,
}

impl ExtensionProvider {
    pub fn new(name: impl Into<String>, slot: ExtensionSlot) -> Self {
        Self {
            name: name.into(),
            slot,
            identity: RwLock::new(None),
        }
    }

    /// Empty slot for the host to fill in later
    pub fn empty_slot() -> ExtensionSlot {
        Arc::new(RwLock::new(None))
    }

    fn api(&self) -> Result<Arc<dyn ExtensionApi>, ProviderError> {
        self.slot
            .read()
            .clone()
            .ok_or_else(|| ProviderError::Unavailable(self.name.clone()))
    }

    fn connected_identity(&self) -> Result<String, ProviderError> {
        self.identity.read().clone().ok_or(ProviderError::NotConnected)
    }
}

#[async_trait]
impl WalletProvider for ExtensionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Extension
    }

    fn is_available(&self) -> bool {
        self.slot.read().is_some()
    }

    async fn connect(&self, network: &Network) -> Result<String, ProviderError> {
        let api = self.api()?;

        let identity = api.request_access().await?;
        let passphrase = api.get_network_passphrase().await?;
        if passphrase != network.passphrase() {
            return Err(ProviderError::NetworkMismatch {
                expected: network.name().to_string(),
                actual: Network::from_passphrase(&passphrase).name().to_string(),
            });
        }

        tracing::debug!("{} granted access to {}", self.name, short(&identity));
        *self.identity.write() = Some(identity.clone());
        Ok(identity)
    }

    async fn disconnect(&self) {
        // Extensions have no revoke call; forgetting the identity is enough
        self.identity.write().take();
    }

    fn current_identity(&self) -> Option<String> {
        self.identity.read().clone()
    }

    async fn sign_transaction(
        &self,
        payload: &str,
        network: &Network,
    ) -> Result<String, ProviderError> {
        let api = self.api()?;
        let address = self.connected_identity()?;
        Ok(api
            .sign_transaction(payload, network.passphrase(), &address)
            .await?)
    }

    async fn sign_auth_challenge(
        &self,
        challenge: &str,
        network: &Network,
    ) -> Result<String, ProviderError> {
        let api = self.api()?;
        let address = self.connected_identity()?;
        Ok(api
            .sign_auth_entry(challenge, network.passphrase(), &address)
            .await?)
    }
}
