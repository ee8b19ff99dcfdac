//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chain label passed to handlers and logs (e.g. `"opera"`).
    #[serde(default = "default_chain")]
    pub chain: String,
    /// Capacity of the ingestion event queue fed by the chain data source.
    #[serde(default = "default_intake_queue_capacity")]
    pub intake_queue_capacity: usize,
    /// Capacity of the account touch queue.
    #[serde(default = "default_account_queue_capacity")]
    pub account_queue_capacity: usize,
    /// Capacity of the log queue feeding the log dispatcher.
    #[serde(default = "default_log_queue_capacity")]
    pub log_queue_capacity: usize,
    /// Maximum number of transactions waiting on their barrier or being
    /// persisted at the same time.
    #[serde(default = "default_max_inflight_persists")]
    pub max_inflight_persists: usize,
    /// How often the checkpoint tracker writes the last processed block.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
    /// Capacity of the committed-transaction broadcast channel.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_chain() -> String { "opera".into() }
fn default_intake_queue_capacity() -> usize { 50_000 }
fn default_account_queue_capacity() -> usize { 1_000 }
fn default_log_queue_capacity() -> usize { 5_000 }
fn default_max_inflight_persists() -> usize { 256 }
fn default_checkpoint_interval_ms() -> u64 { 15_000 }
fn default_broadcast_capacity() -> usize { 1_024 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            intake_queue_capacity: default_intake_queue_capacity(),
            account_queue_capacity: default_account_queue_capacity(),
            log_queue_capacity: default_log_queue_capacity(),
            max_inflight_persists: default_max_inflight_persists(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl PipelineConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_queue_sizes() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.account_queue_capacity, 1_000);
        assert_eq!(cfg.log_queue_capacity, 5_000);
        assert_eq!(cfg.intake_queue_capacity, 50_000);
        assert_eq!(cfg.checkpoint_interval(), Duration::from_secs(15));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"chain": "testnet", "log_queue_capacity": 10}"#).unwrap();
        assert_eq!(cfg.chain, "testnet");
        assert_eq!(cfg.log_queue_capacity, 10);
        assert_eq!(cfg.account_queue_capacity, 1_000);
    }
}
