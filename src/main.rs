//! LedgerLink SDK demonstration
//!
//! Loads the configuration, connects to the endpoint pool and prints what the
//! SDK knows about the network and the local state. No wallet is available
//! from a terminal, so only read-side operations are shown.
//!
//! Usage: `ledgerlink [config-file] [account-id]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ledgerlink::config::SdkConfig;
use ledgerlink::util::{common::short, init_logging};
use ledgerlink::LedgerLinkSDK;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let account = args.next();

    let config = SdkConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(config.log_level.as_deref());

    info!("🚀 Starting LedgerLink SDK demonstration...");
    let sdk = build_sdk(config)?;

    // Example 1: fee estimation
    let estimate = sdk.fee_estimate().await;
    info!(
        "💰 Base fee: {} stroops{}",
        estimate.base_fee,
        if estimate.surge { " (surge pricing)" } else { "" }
    );
    info!("💰 Fee for a 3-operation transaction: {}", sdk.estimate_fee(3).await);

    // Example 2: local state
    let queued = sdk.queued_transactions().await;
    info!("📦 {} transaction(s) waiting in the offline queue", queued.len());
    for item in &queued {
        info!("   {} {:?} (attempts: {})", short(&item.id), item.status, item.attempts);
    }

    let recent = sdk.recent_events(5).await;
    info!("📝 {} recent contract event(s)", recent.len());
    for event in &recent {
        info!("   {} {} in ledger {}", event.timestamp, event.type_key(), event.ledger_sequence);
    }

    // Example 3: watch an account for a few seconds
    if let Some(account) = account {
        info!("👀 Watching activity of {} for 10 seconds", short(&account));
        let subscription = sdk.stream_account_activity(
            &account,
            Arc::new(|activity| {
                info!("   ⚡ {} {:?}", activity.paging_token, activity.transaction_hash);
            }),
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        subscription.unsubscribe();
    } else {
        warn!("No account id given, skipping the activity stream example");
    }

    sdk.shutdown().await;
    Ok(())
}

#[cfg(feature = "rpc-client")]
fn build_sdk(config: SdkConfig) -> anyhow::Result<LedgerLinkSDK> {
    LedgerLinkSDK::from_config(config, ledgerlink::provider::ProviderRegistry::new()).context("initialising the SDK")
}

#[cfg(not(feature = "rpc-client"))]
fn build_sdk(_config: SdkConfig) -> anyhow::Result<LedgerLinkSDK> {
    anyhow::bail!("this binary needs the `rpc-client` feature")
}
