//! Scripted in-memory endpoint used by unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use super::rpc::*;

pub struct FakeRpc {
    label: String,
    fee_stats: Mutex<Result<FeeStats, RpcError>>,
    fee_stats_calls: AtomicUsize,
    account: Mutex<Result<AccountInfo, RpcError>>,
    send_script: Mutex<VecDeque<Result<SubmitResponse, RpcError>>>,
    sent: Mutex<Vec<String>>,
    simulation: Mutex<Result<SimulationResponse, RpcError>>,
    simulated: Mutex<Vec<String>>,
    status_script: Mutex<VecDeque<Result<TransactionStatus, RpcError>>>,
    stream_script: Mutex<VecDeque<Result<Vec<Result<AccountActivity, RpcError>>, RpcError>>>,
    cursors: Mutex<Vec<String>>,
}

impl FakeRpc {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            fee_stats: Mutex::new(Ok(FeeStats {
                last_base_fee: 100,
                p99_charged_fee: 100,
                latest_ledger: 1,
            })),
            fee_stats_calls: AtomicUsize::new(0),
            account: Mutex::new(Ok(AccountInfo {
                account_id: "GSOURCE".to_string(),
                sequence: 100,
            })),
            send_script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            simulation: Mutex::new(Ok(SimulationResponse::default())),
            simulated: Mutex::new(Vec::new()),
            status_script: Mutex::new(VecDeque::new()),
            stream_script: Mutex::new(VecDeque::new()),
            cursors: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fee_stats(&self, stats: Result<FeeStats, RpcError>) {
        *self.fee_stats.lock() = stats;
    }

    pub fn fee_stats_calls(&self) -> usize {
        self.fee_stats_calls.load(Ordering::SeqCst)
    }

    pub fn set_account(&self, account: Result<AccountInfo, RpcError>) {
        *self.account.lock() = account;
    }

    /// Queue the outcome of the next `send_transaction`; unscripted sends succeed
    pub fn push_send(&self, outcome: Result<SubmitResponse, RpcError>) {
        self.send_script.lock().push_back(outcome);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn set_simulation(&self, outcome: Result<SimulationResponse, RpcError>) {
        *self.simulation.lock() = outcome;
    }

    pub fn simulated(&self) -> Vec<String> {
        self.simulated.lock().clone()
    }

    /// Queue the next `get_transaction` result; unscripted lookups return `NotFound`
    pub fn push_status(&self, outcome: Result<TransactionStatus, RpcError>) {
        self.status_script.lock().push_back(outcome);
    }

    /// Queue one stream session: the listed items are delivered and then the
    /// stream ends. Unscripted subscriptions stay open without items.
    pub fn push_stream(&self, session: Result<Vec<Result<AccountActivity, RpcError>>, RpcError>) {
        self.stream_script.lock().push_back(session);
    }

    pub fn cursors(&self) -> Vec<String> {
        self.cursors.lock().clone()
    }
}

pub fn submitted(hash: &str) -> SubmitResponse {
    SubmitResponse {
        hash: hash.to_string(),
        status: SubmitStatus::Pending,
        latest_ledger: 1,
        endpoint: String::new(),
    }
}

pub fn activity(id: &str) -> AccountActivity {
    AccountActivity {
        id: id.to_string(),
        paging_token: format!("pt-{}", id),
        transaction_hash: Some(format!("hash-{}", id)),
        created_at: None,
        payload: serde_json::Value::Null,
    }
}

#[async_trait]
impl LedgerRpc for FakeRpc {
    fn endpoint(&self) -> &str {
        &self.label
    }

    async fn get_account(&self, _account_id: &str) -> Result<AccountInfo, RpcError> {
        self.account.lock().clone()
    }

    async fn fee_stats(&self) -> Result<FeeStats, RpcError> {
        self.fee_stats_calls.fetch_add(1, Ordering::SeqCst);
        self.fee_stats.lock().clone()
    }

    async fn send_transaction(&self, signed_envelope: &str) -> Result<SubmitResponse, RpcError> {
        self.sent.lock().push(signed_envelope.to_string());
        let next = self.send_script.lock().pop_front();
        match next {
            Some(Ok(mut response)) => {
                response.endpoint = self.label.clone();
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => {
                let mut response = submitted(&format!("hash-{}", self.label));
                response.endpoint = self.label.clone();
                Ok(response)
            }
        }
    }

    async fn simulate_transaction(&self, envelope: &str) -> Result<SimulationResponse, RpcError> {
        self.simulated.lock().push(envelope.to_string());
        self.simulation.lock().clone()
    }

    async fn get_transaction(&self, _hash: &str) -> Result<TransactionStatus, RpcError> {
        self.status_script
            .lock()
            .pop_front()
            .unwrap_or(Ok(TransactionStatus::NotFound))
    }

    async fn subscribe_account(
        &self,
        _account_id: &str,
        cursor: &str,
    ) -> Result<ActivityStream, RpcError> {
        self.cursors.lock().push(cursor.to_string());
        let next = self.stream_script.lock().pop_front();
        match next {
            Some(Ok(items)) => Ok(stream::iter(items).boxed()),
            Some(Err(e)) => Err(e),
            None => Ok(stream::pending().boxed()),
        }
    }
}
