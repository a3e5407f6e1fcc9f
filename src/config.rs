//! SDK configuration
//!
//! Defaults are layered under an optional config file and `LEDGERLINK_*`
//! environment variables (nested keys use `__`, e.g.
//! `LEDGERLINK_SESSION__INACTIVITY_TIMEOUT_SECS=600`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::retry::BackoffStrategy;
use crate::ledger::Network;

/// Top-level configuration for [`crate::LedgerLinkSDK`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Ledger network the SDK talks to
    pub network: Network,
    /// Equivalent endpoints, used round-robin
    pub endpoints: Vec<String>,
    /// Directory holding the session record, offline queue and event store
    pub storage_dir: PathBuf,
    pub fees: FeeConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub contract: ContractConfig,
    /// Log level used by [`crate::util::init_logging`]
    pub log_level: Option<String>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            endpoints: vec!["https://soroban-testnet.stellar.org".to_string()],
            storage_dir: PathBuf::from(".ledgerlink"),
            fees: FeeConfig::default(),
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
            contract: ContractConfig::default(),
            log_level: None,
        }
    }
}

/// Fee estimation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Nominal per-operation base fee (stroops). Also the fallback fee.
    pub nominal_base_fee: u64,
    /// How long a fetched fee stays valid
    pub cache_ttl_secs: u64,
    /// Surge pricing kicks in when p99 > nominal * multiplier
    pub surge_multiplier: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            nominal_base_fee: 100,
            cache_ttl_secs: 30,
            surge_multiplier: 2,
        }
    }
}

/// Submission retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_submit_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Reconnect delay cap for account activity streams
    pub max_stream_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_submit_attempts: 3,
            backoff: BackoffStrategy::default(),
            max_stream_backoff_secs: 30,
        }
    }
}

/// Wallet session policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub inactivity_timeout_secs: u64,
    pub watchdog_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 30 * 60,
            watchdog_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

/// Contract invocation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractConfig {
    /// Simulated CPU instruction ceiling; above it a call is refused as out-of-gas
    pub max_cpu_instructions: u64,
    /// Transaction validity window in seconds
    pub timeout_secs: u64,
    /// Number of status polls after submission
    pub confirmation_polls: u32,
    pub confirmation_poll_interval_ms: u64,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            max_cpu_instructions: 100_000_000,
            timeout_secs: 300,
            confirmation_polls: 30,
            confirmation_poll_interval_ms: 1000,
        }
    }
}

impl SdkConfig {
    /// Load configuration: defaults, then `path` (if given and present),
    /// then `LEDGERLINK_*` environment variables. `.env` is honoured.
    #[cfg(feature = "config-file")]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        // Unset keys fall back to the serde defaults above.
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("LEDGERLINK").separator("__"))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let config: SdkConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config.validate()?;
        tracing::info!(
            "⚙️  Loaded configuration: network={}, {} endpoint(s)",
            config.network.name(),
            config.endpoints.len()
        );
        Ok(config)
    }

    /// Load configuration from a JSON file (falls back to defaults when absent)
    #[cfg(not(feature = "config-file"))]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let config = match path {
            Some(path) if path.exists() => {
                let json = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Load(format!("Failed to read config: {}", e)))?;
                serde_json::from_str(&json)
                    .map_err(|e| ConfigError::Load(format!("Failed to parse config: {}", e)))?
            }
            _ => SdkConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the SDK cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("endpoint pool is empty".to_string()));
        }
        self.validate_policies()
    }

    /// Check everything except the endpoint list, for callers that supply
    /// their own RPC clients
    pub fn validate_policies(&self) -> Result<(), ConfigError> {
        if self.retry.max_submit_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_submit_attempts must be at least 1".to_string(),
            ));
        }
        if self.session.inactivity_timeout_secs == 0 || self.session.watchdog_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "session timeouts must be non-zero".to_string(),
            ));
        }
        if self.fees.surge_multiplier < 1 {
            return Err(ConfigError::Invalid("surge_multiplier must be at least 1".to_string()));
        }
        if self.fees.nominal_base_fee == 0 {
            return Err(ConfigError::Invalid("nominal_base_fee must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = SdkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.inactivity_timeout(), Duration::from_secs(1800));
        assert_eq!(config.retry.max_submit_attempts, 3);
        assert_eq!(config.fees.cache_ttl_secs, 30);
    }

    #[test]
    fn test_empty_endpoint_pool_rejected() {
        let config = SdkConfig {
            endpoints: vec![],
            ..SdkConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = SdkConfig::default();
        config.retry.max_submit_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_surge_multiplier_rejected() {
        let mut config = SdkConfig::default();
        config.fees.surge_multiplier = 0;
        assert!(matches!(config.validate_policies(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledgerlink.json");
        std::fs::write(
            &path,
            r#"{ "endpoints": ["https://a.example", "https://b.example"], "fees": { "nominal_base_fee": 250 } }"#,
        )
        .unwrap();

        let config = SdkConfig::load(Some(&path)).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.fees.nominal_base_fee, 250);
        assert_eq!(config.fees.cache_ttl_secs, 30);
    }
}
