//! Wallet provider adapters
//!
//! A provider is an external, untrusted component that holds signing authority
//! on the user's behalf. This module wraps each provider calling convention
//! behind one [`WalletProvider`] contract, so the rest of the SDK only ever sees
//! public identities and opaque signed payloads.

pub mod extension;
pub mod intent;

#[cfg(test)]
pub(crate) mod testing;

pub use extension::{ExtensionApi, ExtensionFault, ExtensionProvider, ExtensionSlot};
pub use intent::{IntentKit, IntentLoader, IntentOutcome, IntentProvider};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::Network;

/// Calling convention of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Injected object, callable synchronously once present
    Extension,
    /// Lazily loaded kit driving an out-of-band UI flow
    Intent,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Extension => write!(f, "extension"),
            ProviderKind::Intent => write!(f, "intent"),
        }
    }
}

/// Uniform wallet provider contract
///
/// Implementations translate their provider's own signals into
/// [`ProviderError`]; in particular every flavour of "the user said no" must
/// surface as [`ProviderError::UserRejected`].
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Provider name used for lookup and persisted with the session
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Whether the provider capability is present right now
    fn is_available(&self) -> bool;

    /// Make the provider available if it needs loading first
    ///
    /// # Returns
    /// * `Ok(())` if the provider is (now) available
    /// * `Err(ProviderError::Unavailable)` if it could not be loaded
    async fn load(&self) -> Result<(), ProviderError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ProviderError::Unavailable(self.name().to_string()))
        }
    }

    /// Ask the provider for access to an identity on `network`
    ///
    /// # Arguments
    /// * `network` - The network the session will operate on
    ///
    /// # Returns
    /// * `Ok(identity)` with the public identity the user granted
    /// * `Err(ProviderError)` on rejection, mismatch or failure
    async fn connect(&self, network: &Network) -> Result<String, ProviderError>;

    /// Forget the granted identity. Never fails.
    async fn disconnect(&self);

    /// Identity granted by the last successful `connect`, if any
    fn current_identity(&self) -> Option<String>;

    /// Sign an opaque transaction payload
    ///
    /// # Arguments
    /// * `payload` - Base64 unsigned transaction envelope
    /// * `network` - Network the transaction targets
    async fn sign_transaction(&self, payload: &str, network: &Network)
        -> Result<String, ProviderError>;

    /// Sign an authentication challenge, returning the signature
    async fn sign_auth_challenge(
        &self,
        challenge: &str,
        network: &Network,
    ) -> Result<String, ProviderError>;
}

/// Errors reported by provider adapters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider not available: {0}")]
    Unavailable(String),

    #[error("User rejected the request")]
    UserRejected,

    #[error("Provider is on network {actual}, expected {expected}")]
    NetworkMismatch { expected: String, actual: String },

    #[error("Provider is not connected")]
    NotConnected,

    #[error("Provider failed: {0}")]
    Failed(String),
}

/// Error codes providers use for "user declined"
const REJECTION_CODES: &[i64] = &[-4, 4001];

const REJECTION_KEYWORDS: &[&str] = &[
    "reject", "declin", "denied", "cancel", "dismiss", "closed by user", "user closed",
];

/// Map a provider-specific failure onto [`ProviderError`].
///
/// Known rejection codes and rejection wording become `UserRejected`;
/// anything else is a plain failure carrying the message.
pub fn normalize_failure(code: Option<i64>, message: &str) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    let rejected = code.is_some_and(|c| REJECTION_CODES.contains(&c))
        || REJECTION_KEYWORDS.iter().any(|k| lower.contains(k));

    if rejected {
        ProviderError::UserRejected
    } else {
        match code {
            Some(code) => ProviderError::Failed(format!("{} (code {})", message, code)),
            None => ProviderError::Failed(message.to_string()),
        }
    }
}

/// Listing entry for a known provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub kind: ProviderKind,
    pub installed: bool,
}

/// Providers known to the host, in registration order
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn WalletProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; a provider with the same name is replaced
    pub fn register(&mut self, provider: Arc<dyn WalletProvider>) {
        let name = provider.name().to_string();
        match self
            .providers
            .iter()
            .position(|p| p.name().eq_ignore_ascii_case(&name))
        {
            Some(index) => self.providers[index] = provider,
            None => self.providers.push(provider),
        }
        tracing::debug!("Registered wallet provider {}", name);
    }

    pub fn with(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Case-insensitive lookup
    pub fn find(&self, name: &str) -> Option<Arc<dyn WalletProvider>> {
        self.providers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|p| ProviderInfo {
                name: p.name().to_string(),
                kind: p.kind(),
                installed: p.is_available(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
