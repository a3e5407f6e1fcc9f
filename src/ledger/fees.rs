//! Fee estimation with caching and surge detection

use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::endpoints::NetworkEndpointSet;
use super::rpc::FeeStats;
use crate::config::FeeConfig;

/// A per-operation base fee together with when and how it was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub base_fee: u64,
    /// True when the surge policy replaced the nominal fee
    pub surge: bool,
    pub cached_at: Instant,
}

/// Caches the network base fee and applies the surge policy
pub struct FeeEstimator {
    config: FeeConfig,
    cache: RwLock<Option<FeeEstimate>>,
}

impl FeeEstimator {
    pub fn new(config: FeeConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(None),
        }
    }

    pub fn nominal_base_fee(&self) -> u64 {
        self.config.nominal_base_fee
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.cache_ttl_secs)
    }

    /// Derive the base fee from network statistics.
    ///
    /// When the p99 charged fee exceeds `nominal * surge_multiplier` the p99
    /// value itself becomes the base fee. The result is never below nominal.
    pub fn apply_surge_policy(&self, stats: &FeeStats) -> (u64, bool) {
        let nominal = self.config.nominal_base_fee;
        let threshold = nominal.saturating_mul(self.config.surge_multiplier);

        if stats.p99_charged_fee > threshold {
            (stats.p99_charged_fee.max(nominal), true)
        } else {
            (nominal.max(stats.last_base_fee), false)
        }
    }

    /// Current base fee, refreshed from the network when the cache is stale.
    /// A failed refresh yields the nominal fee and leaves the cache empty.
    pub async fn current(&self, endpoints: &NetworkEndpointSet) -> FeeEstimate {
        if let Some(cached) = *self.cache.read().await {
            if cached.cached_at.elapsed() < self.ttl() {
                return cached;
            }
        }

        let rpc = endpoints.select();
        match rpc.fee_stats().await {
            Ok(stats) => {
                let (base_fee, surge) = self.apply_surge_policy(&stats);
                if surge {
                    tracing::warn!(
                        "🌊 Fee surge detected on {}: p99 {} > {}x nominal {}, using {}",
                        rpc.endpoint(),
                        stats.p99_charged_fee,
                        self.config.surge_multiplier,
                        self.config.nominal_base_fee,
                        base_fee
                    );
                } else {
                    tracing::debug!("Refreshed base fee from {}: {}", rpc.endpoint(), base_fee);
                }

                let estimate = FeeEstimate {
                    base_fee,
                    surge,
                    cached_at: Instant::now(),
                };
                *self.cache.write().await = Some(estimate);
                estimate
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️  Fee stats unavailable from {} ({}), falling back to {}",
                    rpc.endpoint(),
                    e,
                    self.config.nominal_base_fee
                );
                FeeEstimate {
                    base_fee: self.config.nominal_base_fee,
                    surge: false,
                    cached_at: Instant::now(),
                }
            }
        }
    }

    /// Total fee for a transaction with `operation_count` operations
    pub async fn estimate(&self, endpoints: &NetworkEndpointSet, operation_count: u32) -> u64 {
        let estimate = self.current(endpoints).await;
        estimate.base_fee.saturating_mul(operation_count.max(1) as u64)
    }

    /// Drop the cached fee
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::rpc::{LedgerRpc, RpcError};
    use crate::ledger::testing::FakeRpc;
    use crate::ledger::Network;
    use std::sync::Arc;

    fn stats(last_base_fee: u64, p99: u64) -> FeeStats {
        FeeStats {
            last_base_fee,
            p99_charged_fee: p99,
            latest_ledger: 1,
        }
    }

    fn pool(rpc: Arc<FakeRpc>) -> NetworkEndpointSet {
        NetworkEndpointSet::new(Network::Testnet, vec![rpc as Arc<dyn LedgerRpc>]).unwrap()
    }

    #[test]
    fn test_surge_policy() {
        let estimator = FeeEstimator::new(FeeConfig::default());

        assert_eq!(estimator.apply_surge_policy(&stats(100, 150)), (100, false));
        assert_eq!(estimator.apply_surge_policy(&stats(100, 200)), (100, false));
        assert_eq!(estimator.apply_surge_policy(&stats(100, 201)), (201, true));
        assert_eq!(estimator.apply_surge_policy(&stats(100, 5000)), (5000, true));
        // Never below nominal
        assert_eq!(estimator.apply_surge_policy(&stats(10, 10)), (100, false));
    }

    #[test]
    fn test_surge_fee_never_below_nominal() {
        let estimator = FeeEstimator::new(FeeConfig {
            surge_multiplier: 0,
            ..FeeConfig::default()
        });
        assert_eq!(estimator.apply_surge_policy(&stats(10, 40)), (100, true));
    }

    #[tokio::test]
    async fn test_estimate_never_below_nominal() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_fee_stats(Ok(stats(50, 90)));
        let estimator = FeeEstimator::new(FeeConfig::default());

        assert_eq!(estimator.estimate(&pool(rpc), 1).await, 100);
    }

    #[tokio::test]
    async fn test_congestion_doubles_estimate() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_fee_stats(Ok(stats(100, 1_000)));
        let estimator = FeeEstimator::new(FeeConfig::default());

        let fee = estimator.estimate(&pool(rpc), 2).await;
        assert_eq!(fee, 2_000);
        assert!(fee >= 2 * 100 * 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_falls_back_to_nominal() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_fee_stats(Err(RpcError::Timeout));
        let estimator = FeeEstimator::new(FeeConfig::default());

        let estimate = estimator.current(&pool(rpc.clone())).await;
        assert_eq!(estimate.base_fee, 100);
        assert!(!estimate.surge);

        // Fallback is not cached: the next call asks the network again
        estimator.current(&pool(rpc.clone())).await;
        assert_eq!(rpc.fee_stats_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl() {
        let rpc = Arc::new(FakeRpc::new("a"));
        rpc.set_fee_stats(Ok(stats(100, 100)));
        let endpoints = pool(rpc.clone());
        let estimator = FeeEstimator::new(FeeConfig::default());

        estimator.current(&endpoints).await;
        estimator.current(&endpoints).await;
        assert_eq!(rpc.fee_stats_calls(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        estimator.current(&endpoints).await;
        assert_eq!(rpc.fee_stats_calls(), 2);
    }
}
