//! Ledger client
//!
//! Owns the endpoint pool and everything that talks to the ledger network:
//! fee estimation, submission with bounded retry, simulation, confirmation
//! polling, the offline queue hand-off and live account activity streams.

pub mod endpoints;
pub mod fees;
#[cfg(feature = "rpc-client")]
pub mod http;
pub mod retry;
pub mod rpc;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use endpoints::{Network, NetworkEndpointSet};
pub use fees::{FeeEstimate, FeeEstimator};
pub use retry::BackoffStrategy;
pub use rpc::{
    AccountActivity, AccountInfo, FeeStats, LedgerRpc, RpcError, SimulationResponse,
    SubmitResponse, SubmitStatus, TransactionStatus,
};
pub use stream::{ActivityHandler, Subscription, SubscriptionRegistry};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ContractConfig, FeeConfig, RetryConfig};
use crate::events::TransactionMeta;
use crate::queue::{OfflineQueue, QueueError, QueuedTransaction};
use crate::util::common::short;

/// Successful submission together with how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub response: SubmitResponse,
    /// 1-based attempt that succeeded
    pub attempts: u32,
}

/// How long to wait for a submitted transaction to land in a ledger
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    pub max_polls: u32,
    pub poll_interval: Duration,
}

impl From<&ContractConfig> for ConfirmationPolicy {
    fn from(config: &ContractConfig) -> Self {
        Self {
            max_polls: config.confirmation_polls,
            poll_interval: Duration::from_millis(config.confirmation_poll_interval_ms),
        }
    }
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self::from(&ContractConfig::default())
    }
}

/// Client for one ledger network
pub struct LedgerClient {
    endpoints: Arc<NetworkEndpointSet>,
    fees: FeeEstimator,
    retry: RetryConfig,
    confirmation: ConfirmationPolicy,
    queue: Arc<OfflineQueue>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl LedgerClient {
    pub fn new(
        endpoints: NetworkEndpointSet,
        fees: FeeConfig,
        retry: RetryConfig,
        confirmation: ConfirmationPolicy,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        tracing::info!(
            "🌐 Ledger client for {} with {} endpoint(s): {:?}",
            endpoints.network(),
            endpoints.len(),
            endpoints.labels()
        );

        Self {
            endpoints: Arc::new(endpoints),
            fees: FeeEstimator::new(fees),
            retry,
            confirmation,
            queue,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
        }
    }

    pub fn network(&self) -> &Network {
        self.endpoints.network()
    }

    /// Next endpoint in round-robin order
    pub fn select_endpoint(&self) -> Arc<dyn LedgerRpc> {
        self.endpoints.select()
    }

    /// Total fee for a transaction with `operation_count` operations.
    /// Never fails: network trouble yields the nominal fee.
    pub async fn estimate_fee(&self, operation_count: u32) -> u64 {
        self.fees.estimate(&self.endpoints, operation_count).await
    }

    /// Current per-operation base fee, including whether surge pricing applies
    pub async fn fee_estimate(&self) -> FeeEstimate {
        self.fees.current(&self.endpoints).await
    }

    pub async fn get_account(&self, account_id: &str) -> Result<AccountInfo, LedgerError> {
        let (account, _) = self
            .with_retry("account lookup", self.retry.max_submit_attempts, |rpc| {
                let account_id = account_id.to_string();
                async move { rpc.get_account(&account_id).await }
            })
            .await?;
        Ok(account)
    }

    /// Submit a signed transaction, retrying transient failures.
    ///
    /// Each attempt goes to the next endpoint of the pool. Errors that say the
    /// transaction itself is invalid are returned at once.
    pub async fn submit(
        &self,
        signed_envelope: &str,
        max_attempts: u32,
    ) -> Result<SubmissionReceipt, LedgerError> {
        let (response, attempts) = self
            .with_retry("submission", max_attempts, |rpc| {
                let envelope = signed_envelope.to_string();
                async move { rpc.send_transaction(&envelope).await }
            })
            .await?;

        tracing::info!(
            "✅ Transaction {} accepted by {} ({:?}) on attempt {}",
            short(&response.hash),
            response.endpoint,
            response.status,
            attempts
        );
        Ok(SubmissionReceipt { response, attempts })
    }

    /// Submit with the configured attempt budget
    pub async fn submit_default(&self, signed_envelope: &str) -> Result<SubmissionReceipt, LedgerError> {
        self.submit(signed_envelope, self.retry.max_submit_attempts).await
    }

    /// Dry-run an unsigned envelope
    pub async fn simulate(&self, envelope: &str) -> Result<SimulationResponse, LedgerError> {
        let (response, _) = self
            .with_retry("simulation", self.retry.max_submit_attempts, |rpc| {
                let envelope = envelope.to_string();
                async move { rpc.simulate_transaction(&envelope).await }
            })
            .await?;
        Ok(response)
    }

    /// Poll until `hash` is included in a ledger
    pub async fn await_confirmation(&self, hash: &str) -> Result<TransactionMeta, LedgerError> {
        for poll in 1..=self.confirmation.max_polls {
            let rpc = self.endpoints.select();
            match rpc.get_transaction(hash).await {
                Ok(TransactionStatus::Success(meta)) => {
                    tracing::info!(
                        "📗 Transaction {} confirmed in ledger {}",
                        short(hash),
                        meta.ledger_sequence
                    );
                    return Ok(meta);
                }
                Ok(TransactionStatus::Failed { result }) => {
                    tracing::warn!("📕 Transaction {} failed on-chain: {:?}", short(hash), result);
                    return Err(LedgerError::TransactionFailed {
                        hash: hash.to_string(),
                        result,
                    });
                }
                Ok(TransactionStatus::NotFound) => {
                    tracing::debug!("Transaction {} not yet included (poll {})", short(hash), poll);
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!("Status poll {} for {} failed: {}", poll, short(hash), e);
                }
                Err(e) => return Err(LedgerError::Rpc(e)),
            }
            tokio::time::sleep(self.confirmation.poll_interval).await;
        }

        Err(LedgerError::ConfirmationTimeout {
            hash: hash.to_string(),
        })
    }

    /// Park a signed transaction for later; returns its queue id.
    /// Nothing resubmits it until [`resubmit_queued`](Self::resubmit_queued) is called.
    pub async fn queue_for_offline(&self, signed_envelope: String) -> Result<String, LedgerError> {
        Ok(self.queue.enqueue(signed_envelope).await?)
    }

    /// Explicitly resubmit one queued transaction.
    /// Success removes it from the queue; failure marks it failed.
    pub async fn resubmit_queued(&self, id: &str) -> Result<SubmissionReceipt, LedgerError> {
        let item = self.queue.begin_retry(id).await?;
        tracing::info!("🔁 Resubmitting queued transaction {} (attempt {})", short(id), item.attempts);

        match self.submit(&item.signed_payload, self.retry.max_submit_attempts).await {
            Ok(receipt) => {
                self.queue.remove(id).await?;
                Ok(receipt)
            }
            Err(e) => {
                self.queue.mark_failed(id, e.to_string()).await?;
                Err(e)
            }
        }
    }

    pub async fn queued(&self) -> Vec<QueuedTransaction> {
        self.queue.list().await
    }

    pub async fn discard_queued(&self, id: &str) -> Result<QueuedTransaction, LedgerError> {
        Ok(self.queue.remove(id).await?)
    }

    /// Open a live activity stream for `account_id`, starting from now.
    /// The stream reconnects by itself until unsubscribed or shut down.
    pub fn stream_account_activity(
        &self,
        account_id: &str,
        handler: ActivityHandler,
    ) -> Subscription {
        self.subscriptions.open(
            Arc::clone(&self.endpoints),
            account_id.to_string(),
            handler,
            Duration::from_secs(self.retry.max_stream_backoff_secs),
        )
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active()
    }

    /// Close every open stream
    pub fn shutdown(&self) -> usize {
        self.subscriptions.close_all()
    }

    /// Run `call` against successive endpoints until it succeeds, fails with a
    /// non-transient error, or `max_attempts` is used up.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        max_attempts: u32,
        mut call: F,
    ) -> Result<(T, u32), LedgerError>
    where
        F: FnMut(Arc<dyn LedgerRpc>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let rpc = self.endpoints.select();
            let endpoint = rpc.endpoint().to_string();
            tracing::debug!("{} attempt {}/{} via {}", what, attempt, max_attempts, endpoint);

            match call(rpc).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if !e.is_transient() => {
                    tracing::warn!("❌ {} rejected by {}: {}", what, endpoint, e);
                    return Err(LedgerError::Rejected(e));
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::error!("❌ {} failed after {} attempt(s): {}", what, attempt, e);
                    return Err(LedgerError::RetriesExhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    let delay = self.retry.backoff.calculate_delay(attempt);
                    tracing::warn!(
                        "⚠️ {} attempt {} via {} failed: {} (retrying in {}s)",
                        what,
                        attempt,
                        endpoint,
                        e,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Ledger client errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Rejected by the network: {0}")]
    Rejected(RpcError),

    #[error("Gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: RpcError },

    #[error("RPC error: {0}")]
    Rpc(RpcError),

    #[error("Transaction {hash} failed: {result:?}")]
    TransactionFailed { hash: String, result: Option<String> },

    #[error("Transaction {hash} was not confirmed in time")]
    ConfirmationTimeout { hash: String },

    #[error("Offline queue error: {0}")]
    Queue(#[from] QueueError),
}

impl LedgerError {
    /// Whether trying again later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::RetriesExhausted { .. } | LedgerError::ConfirmationTimeout { .. } => true,
            LedgerError::Rpc(e) => e.is_transient(),
            _ => false,
        }
    }
}
