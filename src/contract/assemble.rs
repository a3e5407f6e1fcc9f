//! Transaction assembly for contract calls
//!
//! The envelope handed to the wallet and the network is the JSON form of the
//! transaction, base64 encoded. Its hash is the SHA-256 of the network
//! passphrase followed by that JSON, hex encoded.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ledger::rpc::{AccountInfo, SimulationResponse};
use crate::ledger::Network;

use super::ContractInvocationRequest;

/// The single contract call carried by an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeOperation {
    pub contract_id: String,
    pub method: String,
    pub args: Vec<Value>,
}

/// Unsigned transaction envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub source_account: String,
    pub sequence: i64,
    /// Total fee offered (inclusion + resources)
    pub fee: u64,
    pub network_passphrase: String,
    pub operation: InvokeOperation,
    /// Resource footprint from simulation
    #[serde(default)]
    pub resource_data: Option<String>,
    #[serde(default)]
    pub auth: Vec<Value>,
    /// Unix seconds after which the network must reject the transaction
    pub valid_until: i64,
}

impl TransactionEnvelope {
    /// Envelope used for the dry run: inclusion fee only, no footprint yet
    pub fn for_simulation(
        source: &AccountInfo,
        request: &ContractInvocationRequest,
        network: &Network,
        base_fee: u64,
        valid_until: i64,
    ) -> Self {
        Self {
            source_account: source.account_id.clone(),
            sequence: source.sequence + 1,
            fee: base_fee,
            network_passphrase: network.passphrase().to_string(),
            operation: InvokeOperation {
                contract_id: request.contract_id.clone(),
                method: request.method.clone(),
                args: request.args.clone(),
            },
            resource_data: None,
            auth: Vec::new(),
            valid_until,
        }
    }

    /// Final envelope: attach the simulated footprint and authorizations and
    /// add the minimum resource fee on top of the inclusion fee
    pub fn prepare(mut self, simulation: &SimulationResponse) -> Self {
        self.fee = self.fee.saturating_add(simulation.min_resource_fee);
        self.resource_data = simulation.transaction_data.clone();
        self.auth = simulation.auth.clone();
        self
    }

    pub fn to_base64(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(general_purpose::STANDARD.encode(json))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, EnvelopeError> {
        let json = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| EnvelopeError(format!("invalid base64: {}", e)))?;
        serde_json::from_slice(&json).map_err(|e| EnvelopeError(format!("invalid envelope: {}", e)))
    }

    /// Hex transaction hash, bound to the network passphrase
    pub fn hash(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(self.network_passphrase.as_bytes());
        hasher.update(&json);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Envelope error: {0}")]
pub struct EnvelopeError(pub String);
