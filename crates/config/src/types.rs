use std::{collections::HashSet, time::Duration};

use serde::Deserialize;
use tracery_primitives::Chain;

use crate::ConfigError;

/// Cross-chain event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingMode {
    /// One global order by checkpoint.
    #[default]
    Omnichain,
    /// Per-chain order only.
    Multichain,
    /// Multichain ordering with separate database namespaces per chain.
    Isolated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    pub id: u64,
    pub name: String,
    #[serde(default = "defaults::finality_block_count")]
    pub finality_block_count: u64,
    /// Initial historical chunk size.
    #[serde(default = "defaults::max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "defaults::polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "defaults::max_requests_per_second")]
    pub max_requests_per_second: u32,
    #[serde(default = "defaults::max_rpc_concurrency")]
    pub max_rpc_concurrency: usize,
    /// Skip interval bookkeeping (testing).
    #[serde(default)]
    pub disable_cache: bool,
}

impl ChainConfig {
    pub fn to_chain(&self) -> Chain {
        Chain {
            id: self.id,
            name: self.name.clone(),
            finality_block_count: self.finality_block_count,
            polling_interval: Duration::from_millis(self.polling_interval_ms),
            disable_cache: self.disable_cache,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub ordering: OrderingMode,
    pub chains: Vec<ChainConfig>,
    /// Server-side cap for read queries.
    #[serde(default = "defaults::database_max_row_limit")]
    pub database_max_row_limit: usize,
    /// Indexing-store cache bound in bytes.
    #[serde(default = "defaults::indexing_cache_max_bytes")]
    pub indexing_cache_max_bytes: usize,
}

impl EngineConfig {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::NoChains);
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.id) {
                return Err(ConfigError::DuplicateChainId(chain.id));
            }
            if chain.name.is_empty() {
                return Err(ConfigError::InvalidChain {
                    chain: chain.id.to_string(),
                    message: "name must not be empty".to_string(),
                });
            }
            if chain.max_block_range == 0 {
                return Err(ConfigError::InvalidChain {
                    chain: chain.name.clone(),
                    message: "max_block_range must be positive".to_string(),
                });
            }
            if chain.polling_interval_ms == 0 {
                return Err(ConfigError::InvalidChain {
                    chain: chain.name.clone(),
                    message: "polling_interval_ms must be positive".to_string(),
                });
            }
            if chain.max_requests_per_second == 0 || chain.max_rpc_concurrency == 0 {
                return Err(ConfigError::InvalidChain {
                    chain: chain.name.clone(),
                    message: "rpc limits must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

mod defaults {
    pub(super) fn finality_block_count() -> u64 {
        64
    }

    pub(super) fn max_block_range() -> u64 {
        2_000
    }

    pub(super) fn polling_interval_ms() -> u64 {
        1_000
    }

    pub(super) fn max_requests_per_second() -> u32 {
        50
    }

    pub(super) fn max_rpc_concurrency() -> usize {
        8
    }

    pub(super) fn database_max_row_limit() -> usize {
        10_000
    }

    pub(super) fn indexing_cache_max_bytes() -> usize {
        256 * 1024 * 1024
    }
}
