//! Network identity and the redundant endpoint pool

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::rpc::LedgerRpc;

pub const PUBLIC_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";
pub const FUTURENET_PASSPHRASE: &str = "Test SDF Future Network ; October 2022";

/// Ledger network a connection or transaction belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Public,
    Testnet,
    Futurenet,
    Custom { passphrase: String },
}

impl Network {
    /// The passphrase that identifies the network and is mixed into transaction hashes
    pub fn passphrase(&self) -> &str {
        match self {
            Network::Public => PUBLIC_PASSPHRASE,
            Network::Testnet => TESTNET_PASSPHRASE,
            Network::Futurenet => FUTURENET_PASSPHRASE,
            Network::Custom { passphrase } => passphrase,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Network::Public => "public",
            Network::Testnet => "testnet",
            Network::Futurenet => "futurenet",
            Network::Custom { .. } => "custom",
        }
    }

    /// Map a passphrase reported by a wallet back to a network
    pub fn from_passphrase(passphrase: &str) -> Self {
        match passphrase {
            PUBLIC_PASSPHRASE => Network::Public,
            TESTNET_PASSPHRASE => Network::Testnet,
            FUTURENET_PASSPHRASE => Network::Futurenet,
            other => Network::Custom {
                passphrase: other.to_string(),
            },
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ordered set of equivalent endpoints for one network.
///
/// Every endpoint serves the same ledger state; rotation only spreads load
/// and routes around a dead node. The rotation index is the only state.
pub struct NetworkEndpointSet {
    network: Network,
    endpoints: Vec<Arc<dyn LedgerRpc>>,
    next: AtomicUsize,
}

impl NetworkEndpointSet {
    /// Create an endpoint set. Returns `None` for an empty pool.
    pub fn new(network: Network, endpoints: Vec<Arc<dyn LedgerRpc>>) -> Option<Self> {
        if endpoints.is_empty() {
            return None;
        }
        Some(Self {
            network,
            endpoints,
            next: AtomicUsize::new(0),
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Pick the next endpoint, round-robin
    pub fn select(&self) -> Arc<dyn LedgerRpc> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        self.endpoints[index].clone()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoint labels, in rotation order
    pub fn labels(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.endpoint().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::FakeRpc;

    #[test]
    fn test_passphrase_round_trip() {
        for network in [Network::Public, Network::Testnet, Network::Futurenet] {
            assert_eq!(Network::from_passphrase(network.passphrase()), network);
        }
        let custom = Network::from_passphrase("Standalone Network ; February 2017");
        assert_eq!(custom.name(), "custom");
        assert_eq!(custom.passphrase(), "Standalone Network ; February 2017");
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(NetworkEndpointSet::new(Network::Testnet, vec![]).is_none());
    }

    #[test]
    fn test_round_robin_rotation() {
        let set = NetworkEndpointSet::new(
            Network::Testnet,
            vec![
                Arc::new(FakeRpc::new("a")) as Arc<dyn LedgerRpc>,
                Arc::new(FakeRpc::new("b")),
                Arc::new(FakeRpc::new("c")),
            ],
        )
        .unwrap();

        let picked: Vec<String> = (0..6).map(|_| set.select().endpoint().to_string()).collect();
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c"]);
        assert_eq!(set.labels(), vec!["a", "b", "c"]);
    }
}
