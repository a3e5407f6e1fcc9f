//! Network RPC surface consumed by the ledger client
//!
//! One [`LedgerRpc`] instance talks to one endpoint. The client owns a pool of
//! them and decides which one serves each call.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::TransactionMeta;

/// Account state needed to build a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub sequence: i64,
}

/// Network-reported fee statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStats {
    /// Base fee charged in the last closed ledger
    pub last_base_fee: u64,
    /// 99th percentile of recently charged fees
    pub p99_charged_fee: u64,
    pub latest_ledger: u32,
}

/// Outcome of handing a transaction to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitStatus {
    /// Accepted into the endpoint's queue
    Pending,
    /// Already known to the endpoint; the earlier submission stands
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub hash: String,
    pub status: SubmitStatus,
    pub latest_ledger: u32,
    /// Label of the endpoint that accepted the transaction
    pub endpoint: String,
}

/// Estimated resource consumption reported by a simulation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCost {
    pub cpu_instructions: u64,
    pub memory_bytes: u64,
}

/// Raw simulation outcome as reported by the endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResponse {
    pub cost: ResourceCost,
    pub min_resource_fee: u64,
    /// Opaque resource footprint to attach to the final transaction
    pub transaction_data: Option<String>,
    /// Authorization entries the call requires
    pub auth: Vec<serde_json::Value>,
    pub return_value: Option<serde_json::Value>,
    /// Set when the dry run itself failed
    pub error: Option<String>,
    pub latest_ledger: u32,
}

/// Status of a submitted transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionStatus {
    /// Not (yet) included in a ledger
    NotFound,
    Success(TransactionMeta),
    Failed { result: Option<String> },
}

/// One item pushed on an account activity stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountActivity {
    pub id: String,
    /// Resume position for reconnects
    pub paging_token: String,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

pub type ActivityStream = BoxStream<'static, Result<AccountActivity, RpcError>>;

/// Ledger network RPC capability of a single endpoint
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Label identifying the endpoint (usually its URL)
    fn endpoint(&self) -> &str;

    async fn get_account(&self, account_id: &str) -> Result<AccountInfo, RpcError>;

    async fn fee_stats(&self) -> Result<FeeStats, RpcError>;

    /// Submit a signed, base64 encoded transaction envelope
    async fn send_transaction(&self, signed_envelope: &str) -> Result<SubmitResponse, RpcError>;

    /// Dry-run an unsigned, base64 encoded transaction envelope
    async fn simulate_transaction(&self, envelope: &str) -> Result<SimulationResponse, RpcError>;

    async fn get_transaction(&self, hash: &str) -> Result<TransactionStatus, RpcError>;

    /// Open a server-push stream of activity for `account_id`, starting at `cursor`
    /// (`"now"` for live-only).
    async fn subscribe_account(
        &self,
        account_id: &str,
        cursor: &str,
    ) -> Result<ActivityStream, RpcError>;
}

/// RPC errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Endpoint unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Endpoint asked to try again later: {0}")]
    TryAgainLater(String),

    #[error("Transaction rejected ({code}): {detail}")]
    Rejected { code: String, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Whether the failure is about the path to the network rather than the
    /// request itself. Only transient failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Network(_)
            | RpcError::Timeout
            | RpcError::Unavailable { .. }
            | RpcError::TryAgainLater(_)
            | RpcError::InvalidResponse(_) => true,
            RpcError::Rejected { .. } | RpcError::NotFound(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RpcError::Timeout.is_transient());
        assert!(RpcError::Network("connection reset".into()).is_transient());
        assert!(RpcError::Unavailable {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(RpcError::TryAgainLater("queue full".into()).is_transient());

        assert!(!RpcError::Rejected {
            code: "txBAD_SEQ".into(),
            detail: "bad sequence".into()
        }
        .is_transient());
        assert!(!RpcError::NotFound("account".into()).is_transient());
    }
}
