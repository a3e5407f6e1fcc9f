//! Contract invocation
//!
//! Every call is simulated first. Read-only calls stop there and return the
//! simulated value. State-changing calls continue only if the simulation
//! succeeded within the resource ceiling: assemble, sign through the session,
//! submit, wait for confirmation, then extract and store the emitted events.
//!
//! Failures come back inside [`ContractInvocationResult`] with a
//! [`ContractErrorKind`], so callers can tell "will never work" from
//! "try again" from "the user said no".

pub mod assemble;

pub use assemble::{EnvelopeError, InvokeOperation, TransactionEnvelope};

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ContractConfig;
use crate::events::{extract_events, ContractEvent, EventStore};
use crate::ledger::rpc::{ResourceCost, SimulationResponse};
use crate::ledger::{LedgerClient, LedgerError};
use crate::session::{SessionError, TransactionSigner};
use crate::util::common::short;

/// A contract method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInvocationRequest {
    pub contract_id: String,
    pub method: String,
    /// Arguments in their tagged JSON form, e.g. `{"u64": 5}`
    pub args: Vec<Value>,
}

impl ContractInvocationRequest {
    pub fn new(contract_id: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            contract_id: contract_id.into(),
            method: method.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationKind {
    /// Simulate only; no signature, no submission
    ReadOnly,
    StateChanging,
}

/// Invocation failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractErrorKind {
    /// Simulated resource cost is above the ceiling
    OutOfGas,
    /// The dry run failed; the call cannot succeed as issued
    SimulationFailed,
    /// Submission or on-chain execution failed
    TransactionFailed,
    /// The wallet holder declined to sign
    UserRejected,
    Unknown,
}

impl ContractErrorKind {
    /// Whether issuing the same call again could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ContractErrorKind::TransactionFailed | ContractErrorKind::Unknown)
    }
}

impl fmt::Display for ContractErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ContractErrorKind::OutOfGas => "OUT_OF_GAS",
            ContractErrorKind::SimulationFailed => "SIMULATION_FAILED",
            ContractErrorKind::TransactionFailed => "TRANSACTION_FAILED",
            ContractErrorKind::UserRejected => "USER_REJECTED",
            ContractErrorKind::Unknown => "UNKNOWN",
        };
        f.write_str(code)
    }
}

/// Outcome of a dry run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub cost: ResourceCost,
    pub min_resource_fee: u64,
    pub return_value: Option<Value>,
    pub latest_ledger: u32,
    pub error: Option<String>,
    pub error_kind: Option<ContractErrorKind>,
}

impl SimulationResult {
    fn failed(kind: ContractErrorKind, error: String) -> Self {
        Self {
            success: false,
            cost: ResourceCost::default(),
            min_resource_fee: 0,
            return_value: None,
            latest_ledger: 0,
            error: Some(error),
            error_kind: Some(kind),
        }
    }
}

/// Outcome of one invocation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInvocationResult {
    pub success: bool,
    pub transaction_hash: Option<String>,
    pub return_value: Option<Value>,
    pub events: Vec<ContractEvent>,
    pub error: Option<String>,
    pub error_kind: Option<ContractErrorKind>,
}

impl ContractInvocationResult {
    fn ok(transaction_hash: Option<String>, return_value: Option<Value>, events: Vec<ContractEvent>) -> Self {
        Self {
            success: true,
            transaction_hash,
            return_value,
            events,
            error: None,
            error_kind: None,
        }
    }

    fn failed(kind: ContractErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_hash: None,
            return_value: None,
            events: Vec::new(),
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }

    fn with_hash(mut self, hash: &str) -> Self {
        self.transaction_hash = Some(hash.to_string());
        self
    }
}

/// Simulation failures that mean the resource budget ran out
const BUDGET_MARKERS: &[&str] = &["budget", "exceededlimit", "exceeded limit", "out of gas"];

/// Contract invocation service
pub struct ContractService {
    ledger: Arc<LedgerClient>,
    events: Arc<EventStore>,
    config: ContractConfig,
}

impl ContractService {
    pub fn new(ledger: Arc<LedgerClient>, events: Arc<EventStore>, config: ContractConfig) -> Self {
        Self {
            ledger,
            events,
            config,
        }
    }

    /// Dry-run `request` as `source_identity`. Never submits anything.
    pub async fn simulate(
        &self,
        request: &ContractInvocationRequest,
        source_identity: &str,
    ) -> SimulationResult {
        match self.dry_run(request, source_identity).await {
            Ok((_, simulation)) => self.judge(&simulation, true),
            Err(failure) => SimulationResult::failed(
                failure.error_kind.unwrap_or(ContractErrorKind::Unknown),
                failure.error.unwrap_or_default(),
            ),
        }
    }

    /// Invoke `request`. State-changing calls need `signer`.
    pub async fn invoke(
        &self,
        request: &ContractInvocationRequest,
        source_identity: &str,
        kind: InvocationKind,
        signer: Option<&dyn TransactionSigner>,
    ) -> ContractInvocationResult {
        tracing::info!(
            "📜 Invoking {}::{} ({:?}) as {}",
            short(&request.contract_id),
            request.method,
            kind,
            short(source_identity)
        );

        let (envelope, simulation) = match self.dry_run(request, source_identity).await {
            Ok(prepared) => prepared,
            Err(failure) => return failure,
        };

        // The ceiling guards fees, and only state-changing calls pay them
        let verdict = self.judge(&simulation, kind == InvocationKind::StateChanging);
        if !verdict.success {
            let kind = verdict.error_kind.unwrap_or(ContractErrorKind::Unknown);
            return ContractInvocationResult::failed(kind, verdict.error.unwrap_or_default());
        }

        match kind {
            InvocationKind::ReadOnly => {
                ContractInvocationResult::ok(None, simulation.return_value, Vec::new())
            }
            InvocationKind::StateChanging => {
                let Some(signer) = signer else {
                    return ContractInvocationResult::failed(
                        ContractErrorKind::Unknown,
                        "state-changing call needs a signer",
                    );
                };
                self.execute(request, envelope.prepare(&simulation), simulation.return_value, signer)
                    .await
            }
        }
    }

    /// Build the simulation envelope and run it
    async fn dry_run(
        &self,
        request: &ContractInvocationRequest,
        source_identity: &str,
    ) -> Result<(TransactionEnvelope, SimulationResponse), ContractInvocationResult> {
        let account = self
            .ledger
            .get_account(source_identity)
            .await
            .map_err(|e| ledger_failure("account lookup", e, ContractErrorKind::Unknown))?;

        let base_fee = self.ledger.fee_estimate().await.base_fee;
        let valid_until = Utc::now().timestamp() + self.config.timeout_secs as i64;
        let envelope = TransactionEnvelope::for_simulation(
            &account,
            request,
            self.ledger.network(),
            base_fee,
            valid_until,
        );
        let encoded = envelope
            .to_base64()
            .map_err(|e| ContractInvocationResult::failed(ContractErrorKind::Unknown, e.to_string()))?;

        let simulation = self
            .ledger
            .simulate(&encoded)
            .await
            .map_err(|e| ledger_failure("simulation", e, ContractErrorKind::SimulationFailed))?;

        Ok((envelope, simulation))
    }

    /// Classify a simulation response, optionally against the resource ceiling
    fn judge(&self, simulation: &SimulationResponse, enforce_ceiling: bool) -> SimulationResult {
        let mut result = SimulationResult {
            success: true,
            cost: simulation.cost,
            min_resource_fee: simulation.min_resource_fee,
            return_value: simulation.return_value.clone(),
            latest_ledger: simulation.latest_ledger,
            error: None,
            error_kind: None,
        };

        if let Some(error) = &simulation.error {
            let lower = error.to_ascii_lowercase();
            let kind = if BUDGET_MARKERS.iter().any(|m| lower.contains(m)) {
                ContractErrorKind::OutOfGas
            } else {
                ContractErrorKind::SimulationFailed
            };
            tracing::warn!("❌ Simulation failed ({}): {}", kind, error);
            result.success = false;
            result.error = Some(error.clone());
            result.error_kind = Some(kind);
        } else if enforce_ceiling && simulation.cost.cpu_instructions > self.config.max_cpu_instructions {
            tracing::warn!(
                "⛽ Simulated cost {} instructions exceeds ceiling {}",
                simulation.cost.cpu_instructions,
                self.config.max_cpu_instructions
            );
            result.success = false;
            result.error = Some(format!(
                "simulated cost of {} instructions exceeds the ceiling of {}",
                simulation.cost.cpu_instructions, self.config.max_cpu_instructions
            ));
            result.error_kind = Some(ContractErrorKind::OutOfGas);
        } else {
            tracing::debug!(
                "Simulation ok: {} instructions, {} bytes, resource fee {}",
                simulation.cost.cpu_instructions,
                simulation.cost.memory_bytes,
                simulation.min_resource_fee
            );
        }
        result
    }

    async fn execute(
        &self,
        request: &ContractInvocationRequest,
        envelope: TransactionEnvelope,
        simulated_return: Option<Value>,
        signer: &dyn TransactionSigner,
    ) -> ContractInvocationResult {
        let encoded = match envelope.to_base64() {
            Ok(encoded) => encoded,
            Err(e) => return ContractInvocationResult::failed(ContractErrorKind::Unknown, e.to_string()),
        };
        let expected_hash = match envelope.hash() {
            Ok(hash) => hash,
            Err(e) => return ContractInvocationResult::failed(ContractErrorKind::Unknown, e.to_string()),
        };

        let signed = match signer.sign(&encoded).await {
            Ok(signed) => signed,
            Err(SessionError::UserRejected) => {
                return ContractInvocationResult::failed(
                    ContractErrorKind::UserRejected,
                    SessionError::UserRejected.to_string(),
                )
            }
            Err(e) => return ContractInvocationResult::failed(ContractErrorKind::Unknown, e.to_string()),
        };

        let receipt = match self.ledger.submit_default(&signed).await {
            Ok(receipt) => receipt,
            Err(e) => return ledger_failure("submission", e, ContractErrorKind::TransactionFailed),
        };
        let hash = match receipt.response.hash {
            reported if reported.is_empty() => expected_hash,
            reported => {
                if reported != expected_hash {
                    // Wallets may rewrite the envelope (fee bump, sequence)
                    tracing::warn!(
                        "⚠️ Network hash {} differs from prepared envelope {}",
                        short(&reported),
                        short(&expected_hash)
                    );
                }
                reported
            }
        };

        let meta = match self.ledger.await_confirmation(&hash).await {
            Ok(meta) => meta,
            Err(e) => {
                return ledger_failure("confirmation", e, ContractErrorKind::TransactionFailed)
                    .with_hash(&hash)
            }
        };

        let events = extract_events(&meta, &request.contract_id);
        match self.events.put(events.clone()).await {
            Ok(stored) => tracing::info!("📝 Stored {} new event(s) from {}", stored, short(&hash)),
            Err(e) => tracing::warn!("Failed to store events of {}: {}", short(&hash), e),
        }

        let return_value = meta.return_value.clone().or(simulated_return);
        ContractInvocationResult::ok(Some(hash), return_value, events)
    }
}

/// Map a ledger error onto the invocation taxonomy. Transient network trouble
/// is always `TransactionFailed` (retry later); otherwise `terminal` applies.
fn ledger_failure(stage: &str, error: LedgerError, terminal: ContractErrorKind) -> ContractInvocationResult {
    let kind = if error.is_transient() {
        ContractErrorKind::TransactionFailed
    } else {
        terminal
    };
    tracing::warn!("❌ Contract call failed during {} ({}): {}", stage, kind, error);
    ContractInvocationResult::failed(kind, format!("{} failed: {}", stage, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeeConfig, RetryConfig};
    use crate::events::{EventKind, TransactionMeta};
    use crate::ledger::rpc::{LedgerRpc, RpcError, TransactionStatus};
    use crate::ledger::testing::{submitted, FakeRpc};
    use crate::ledger::{ConfirmationPolicy, Network, NetworkEndpointSet};
    use crate::queue::OfflineQueue;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    struct RecordingSigner {
        calls: Mutex<Vec<String>>,
        reject: bool,
    }

    impl RecordingSigner {
        fn new(reject: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reject,
            }
        }
    }

    #[async_trait]
    impl TransactionSigner for RecordingSigner {
        async fn sign(&self, payload: &str) -> Result<String, SessionError> {
            self.calls.lock().push(payload.to_string());
            if self.reject {
                return Err(SessionError::UserRejected);
            }
            Ok(format!("signed:{}", payload))
        }
    }

    fn service(rpc: Arc<FakeRpc>) -> (ContractService, Arc<EventStore>) {
        let ledger = LedgerClient::new(
            NetworkEndpointSet::new(Network::Testnet, vec![rpc as Arc<dyn LedgerRpc>]).unwrap(),
            FeeConfig::default(),
            RetryConfig::default(),
            ConfirmationPolicy {
                max_polls: 5,
                poll_interval: Duration::from_millis(10),
            },
            Arc::new(OfflineQueue::new()),
        );
        let events = Arc::new(EventStore::new());
        let config = ContractConfig {
            max_cpu_instructions: 1_000_000,
            ..ContractConfig::default()
        };
        (
            ContractService::new(Arc::new(ledger), events.clone(), config),
            events,
        )
    }

    fn simulation(cpu: u64) -> SimulationResponse {
        SimulationResponse {
            cost: ResourceCost {
                cpu_instructions: cpu,
                memory_bytes: 1_000,
            },
            min_resource_fee: 400,
            transaction_data: Some("FOOTPRINT".into()),
            return_value: Some(json!({"u32": 7})),
            ..Default::default()
        }
    }

    fn request() -> ContractInvocationRequest {
        ContractInvocationRequest::new("CREWARDS", "claim", vec![])
    }

    #[tokio::test]
    async fn test_read_only_returns_value_without_hash() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_simulation(Ok(simulation(5_000)));
        let (service, _) = service(rpc.clone());
        let signer = RecordingSigner::new(false);

        let result = service
            .invoke(&request(), "GSOURCE", InvocationKind::ReadOnly, Some(&signer))
            .await;

        assert!(result.success);
        assert_eq!(result.return_value, Some(json!({"u32": 7})));
        assert!(result.transaction_hash.is_none());
        assert!(signer.calls.lock().is_empty());
        assert!(rpc.sent().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_gas_never_signs_or_submits() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_simulation(Ok(simulation(2_000_000)));
        let (service, _) = service(rpc.clone());
        let signer = RecordingSigner::new(false);

        let result = service
            .invoke(&request(), "GSOURCE", InvocationKind::StateChanging, Some(&signer))
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ContractErrorKind::OutOfGas));
        assert!(signer.calls.lock().is_empty());
        assert!(rpc.sent().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_ignores_cost_ceiling() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_simulation(Ok(simulation(2_000_000)));
        let (service, _) = service(rpc.clone());

        let result = service
            .invoke(&request(), "GSOURCE", InvocationKind::ReadOnly, None)
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.return_value, Some(json!({"u32": 7})));

        // A dry run still reports what a state-changing call would hit
        let simulated = service.simulate(&request(), "GSOURCE").await;
        assert_eq!(simulated.error_kind, Some(ContractErrorKind::OutOfGas));
        assert!(rpc.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_network_hash_falls_back_to_envelope_hash() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_simulation(Ok(simulation(5_000)));
        rpc.push_send(Ok(submitted("")));
        rpc.push_status(Ok(TransactionStatus::Success(TransactionMeta {
            transaction_hash: String::new(),
            ledger_sequence: 901,
            closed_at: 1_700_000_000,
            result_meta: json!({"events": []}),
            return_value: None,
        })));
        let (service, _) = service(rpc);
        let signer = RecordingSigner::new(false);

        let result = service
            .invoke(&request(), "GSOURCE", InvocationKind::StateChanging, Some(&signer))
            .await;

        let prepared = TransactionEnvelope::from_base64(&signer.calls.lock()[0]).unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.transaction_hash, Some(prepared.hash().unwrap()));
    }

    #[tokio::test]
    async fn test_simulation_error_is_classified() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_simulation(Ok(SimulationResponse {
            error: Some("HostError: Error(Contract, #3)".into()),
            ..Default::default()
        }));
        let (service, _) = service(rpc.clone());

        let simulated = service.simulate(&request(), "GSOURCE").await;
        assert!(!simulated.success);
        assert_eq!(simulated.error_kind, Some(ContractErrorKind::SimulationFailed));

        rpc.set_simulation(Ok(SimulationResponse {
            error: Some("HostError: Error(Budget, ExceededLimit)".into()),
            ..Default::default()
        }));
        let simulated = service.simulate(&request(), "GSOURCE").await;
        assert_eq!(simulated.error_kind, Some(ContractErrorKind::OutOfGas));
        assert!(rpc.sent().is_empty());
    }

    #[tokio::test]
    async fn test_state_changing_happy_path_stores_events() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_simulation(Ok(simulation(5_000)));
        rpc.push_send(Ok(submitted("txhash01")));
        rpc.push_status(Ok(TransactionStatus::NotFound));
        rpc.push_status(Ok(TransactionStatus::Success(TransactionMeta {
            transaction_hash: "txhash01".into(),
            ledger_sequence: 900,
            closed_at: 1_700_000_000,
            result_meta: json!({"events": [{
                "type": "contract",
                "body": {"v0": {
                    "topics": [{"symbol": "reward_distributed"}],
                    "data": {"map": [
                        {"key": {"symbol": "recipient"}, "val": {"address": "GWINNER"}},
                        {"key": {"symbol": "amount"}, "val": {"i128": "250"}}
                    ]}
                }}
            }]}),
            return_value: Some(json!({"bool": true})),
        })));
        let (service, events) = service(rpc.clone());
        let signer = RecordingSigner::new(false);

        let result = service
            .invoke(&request(), "GSOURCE", InvocationKind::StateChanging, Some(&signer))
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.transaction_hash.as_deref(), Some("txhash01"));
        assert_eq!(result.return_value, Some(json!({"bool": true})));
        assert_eq!(result.events.len(), 1);
        assert!(matches!(result.events[0].kind, EventKind::Reward { amount: Some(250), .. }));
        assert_eq!(events.by_contract("CREWARDS").await.len(), 1);

        // The wallet saw the prepared envelope, the network got its signature
        let signed_payload = signer.calls.lock()[0].clone();
        let envelope = TransactionEnvelope::from_base64(&signed_payload).unwrap();
        assert_eq!(envelope.fee, 100 + 400);
        assert_eq!(envelope.resource_data.as_deref(), Some("FOOTPRINT"));
        assert_eq!(rpc.sent(), vec![format!("signed:{}", signed_payload)]);
    }

    #[tokio::test]
    async fn test_user_rejection_is_its_own_kind() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_simulation(Ok(simulation(5_000)));
        let (service, _) = service(rpc.clone());
        let signer = RecordingSigner::new(true);

        let result = service
            .invoke(&request(), "GSOURCE", InvocationKind::StateChanging, Some(&signer))
            .await;

        assert_eq!(result.error_kind, Some(ContractErrorKind::UserRejected));
        assert!(rpc.sent().is_empty());
    }

    #[tokio::test]
    async fn test_on_chain_failure_keeps_hash() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_simulation(Ok(simulation(5_000)));
        rpc.push_send(Ok(submitted("txfail")));
        rpc.push_status(Ok(TransactionStatus::Failed {
            result: Some("txFAILED".into()),
        }));
        let (service, _) = service(rpc);
        let signer = RecordingSigner::new(false);

        let result = service
            .invoke(&request(), "GSOURCE", InvocationKind::StateChanging, Some(&signer))
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ContractErrorKind::TransactionFailed));
        assert_eq!(result.transaction_hash.as_deref(), Some("txfail"));
    }

    #[tokio::test]
    async fn test_missing_signer_and_missing_account() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_simulation(Ok(simulation(5_000)));
        let (service, _) = service(rpc.clone());

        let result = service
            .invoke(&request(), "GSOURCE", InvocationKind::StateChanging, None)
            .await;
        assert_eq!(result.error_kind, Some(ContractErrorKind::Unknown));

        rpc.set_account(Err(RpcError::NotFound("GNOBODY".into())));
        let result = service
            .invoke(&request(), "GNOBODY", InvocationKind::ReadOnly, None)
            .await;
        assert!(!result.success);
        assert!(rpc.simulated().is_empty());
    }
}
