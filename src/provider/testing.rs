//! Scripted wallet provider used by unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{ProviderError, ProviderKind, WalletProvider};
use crate::ledger::Network;

pub struct FakeProvider {
    name: String,
    available: AtomicBool,
    identity: Mutex<String>,
    connected: Mutex<Option<String>>,
    connect_script: Mutex<VecDeque<Result<String, ProviderError>>>,
    sign_script: Mutex<VecDeque<Result<String, ProviderError>>>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    signed: Mutex<Vec<String>>,
    /// When set, signing waits for a notification before answering
    sign_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeProvider {
    pub fn new(name: &str, identity: &str) -> Self {
        Self {
            name: name.to_string(),
            available: AtomicBool::new(true),
            identity: Mutex::new(identity.to_string()),
            connected: Mutex::new(None),
            connect_script: Mutex::new(VecDeque::new()),
            sign_script: Mutex::new(VecDeque::new()),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            signed: Mutex::new(Vec::new()),
            sign_gate: Mutex::new(None),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Identity granted by unscripted connects
    pub fn set_identity(&self, identity: &str) {
        *self.identity.lock() = identity.to_string();
    }

    pub fn push_connect(&self, outcome: Result<String, ProviderError>) {
        self.connect_script.lock().push_back(outcome);
    }

    pub fn push_sign(&self, outcome: Result<String, ProviderError>) {
        self.sign_script.lock().push_back(outcome);
    }

    pub fn gate_signing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.sign_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn signed(&self) -> Vec<String> {
        self.signed.lock().clone()
    }
}

#[async_trait]
impl WalletProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Extension
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn connect(&self, _network: &Network) -> Result<String, ProviderError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_available() {
            return Err(ProviderError::Unavailable(self.name.clone()));
        }
        let outcome = self
            .connect_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.identity.lock().clone()));
        if let Ok(identity) = &outcome {
            *self.connected.lock() = Some(identity.clone());
        }
        outcome
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        *self.connected.lock() = None;
    }

    fn current_identity(&self) -> Option<String> {
        self.connected.lock().clone()
    }

    async fn sign_transaction(
        &self,
        payload: &str,
        _network: &Network,
    ) -> Result<String, ProviderError> {
        let gate = self.sign_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.signed.lock().push(payload.to_string());
        self.sign_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("signed:{}", payload)))
    }

    async fn sign_auth_challenge(
        &self,
        challenge: &str,
        network: &Network,
    ) -> Result<String, ProviderError> {
        self.sign_transaction(challenge, network).await
    }
}
