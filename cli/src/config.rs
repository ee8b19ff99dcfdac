//! CLI configuration file.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use chainpipe_core::PipelineConfig;
use chainpipe_evm::OPERA_SFC_CONTRACT;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::LogConfig;

/// Everything a `chainpipe` run can be configured with.
///
/// Pipeline settings sit at the top level of the JSON file:
///
/// ```json
/// { "chain": "opera", "log_queue_capacity": 5000, "log": { "level": "debug" } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Contract whose staking events are indexed.
    #[serde(default = "default_sfc_contract")]
    pub sfc_contract: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds a cached transaction is served.
    #[serde(default = "default_eviction_secs")]
    pub eviction_secs: u64,
    #[serde(default = "default_shards")]
    pub shards: usize,
}

fn default_sfc_contract() -> Address {
    OPERA_SFC_CONTRACT
}

fn default_eviction_secs() -> u64 {
    600
}

fn default_shards() -> usize {
    1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            log: LogConfig::default(),
            cache: CacheConfig::default(),
            sfc_contract: default_sfc_contract(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction_secs: default_eviction_secs(),
            shards: default_shards(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config '{}'", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid config '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_uses_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{ "chain": "testnet", "log": { "json": true } }"#).unwrap();
        assert_eq!(cfg.pipeline.chain, "testnet");
        assert_eq!(cfg.pipeline.log_queue_capacity, 5_000);
        assert!(cfg.log.json);
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.cache.shards, 1024);
        assert_eq!(cfg.sfc_contract, OPERA_SFC_CONTRACT);
    }
}
