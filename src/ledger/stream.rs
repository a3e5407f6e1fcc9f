//! Live account activity subscriptions
//!
//! Each subscription is a spawned task that keeps a server-push stream open,
//! resuming from the last seen paging token after any stream-level failure.
//! The registry keeps every task handle so teardown can close them all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::endpoints::NetworkEndpointSet;
use super::retry::reconnect_delay;
use super::rpc::AccountActivity;
use crate::util::common::short;

/// Callback invoked for every received activity item
pub type ActivityHandler = Arc<dyn Fn(AccountActivity) + Send + Sync>;

/// Tracks all open subscriptions of a ledger client
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    handles: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a subscription task for `account_id`
    pub fn open(
        self: &Arc<Self>,
        endpoints: Arc<NetworkEndpointSet>,
        account_id: String,
        handler: ActivityHandler,
        max_backoff: Duration,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!("📡 Opening activity stream #{} for {}", id, short(&account_id));

        let handle = tokio::spawn(run_subscription(
            id,
            endpoints,
            account_id,
            handler,
            max_backoff,
        ));
        self.handles.lock().insert(id, handle);

        Subscription {
            id,
            registry: Arc::clone(self),
        }
    }

    /// Close one subscription. Returns false if it was already closed.
    pub fn close(&self, id: u64) -> bool {
        match self.handles.lock().remove(&id) {
            Some(handle) => {
                handle.abort();
                tracing::info!("🔌 Closed activity stream #{}", id);
                true
            }
            None => false,
        }
    }

    /// Close every open subscription, returning how many were closed
    pub fn close_all(&self) -> usize {
        let handles: Vec<(u64, JoinHandle<()>)> = self.handles.lock().drain().collect();
        for (_, handle) in &handles {
            handle.abort();
        }
        if !handles.is_empty() {
            tracing::info!("🔌 Closed {} activity stream(s)", handles.len());
        }
        handles.len()
    }

    pub fn active(&self) -> usize {
        self.handles.lock().len()
    }
}

/// Handle to an open activity stream
pub struct Subscription {
    id: u64,
    registry: Arc<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the stream. Dropping the handle without calling this keeps the
    /// stream open until the client shuts down.
    pub fn unsubscribe(self) -> bool {
        self.registry.close(self.id)
    }
}

async fn run_subscription(
    id: u64,
    endpoints: Arc<NetworkEndpointSet>,
    account_id: String,
    handler: ActivityHandler,
    max_backoff: Duration,
) {
    let mut cursor = "now".to_string();
    let mut failures: u32 = 0;

    loop {
        let rpc = endpoints.select();
        match rpc.subscribe_account(&account_id, &cursor).await {
            Ok(mut stream) => {
                tracing::debug!("Stream #{} connected to {} at cursor {}", id, rpc.endpoint(), cursor);
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(activity) => {
                            failures = 0;
                            cursor = activity.paging_token.clone();
                            handler(activity);
                        }
                        Err(e) => {
                            tracing::warn!("Stream #{} error on {}: {}", id, rpc.endpoint(), e);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Stream #{} failed to connect to {}: {}", id, rpc.endpoint(), e);
            }
        }

        failures = failures.saturating_add(1);
        let delay = reconnect_delay(failures, max_backoff);
        tracing::info!("🔄 Reconnecting stream #{} in {}s", id, delay.as_secs());
        tokio::time::sleep(delay).await;
    }
}
