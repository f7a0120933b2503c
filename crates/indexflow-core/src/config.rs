//! Pipeline configuration. Loaded once at startup and immutable afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::LogFilter;

/// Backoff parameters for transient provider failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the first try).
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// Caps exponential growth.
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Delays are scaled by a random factor in `[1 - j, 1 + j]`.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter_fraction: 0.2,
        }
    }
}

/// Configuration for a pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Unique name for this pipeline; used as the writer claim owner.
    pub id: String,
    /// EVM chain id, for logs and status output.
    pub chain_id: u64,
    /// First block to index when no checkpoint exists.
    pub start_height: u64,
    /// Upper bound on blocks per `eth_getLogs` batch.
    pub max_batch_size: u64,
    /// Consecutive successful batches before the batch size grows again.
    pub batch_growth_after: u32,
    /// How far back a reorg may reach before it is unrecoverable.
    pub max_reorg_depth: u64,
    /// Re-check interval when caught up with the head (milliseconds).
    pub poll_interval_ms: u64,
    /// Timeout applied to every chain client call (milliseconds).
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    /// Contracts and event signatures to request.
    pub filter: LogFilter,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "indexflow".into(),
            chain_id: 1,
            start_height: 0,
            max_batch_size: 2000,
            batch_growth_after: 5,
            max_reorg_depth: 64,
            poll_interval_ms: 4000,
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
            filter: LogFilter::default(),
        }
    }
}

impl IndexerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.id.trim().is_empty() {
            return Err(IndexerError::Config("id must not be empty".into()));
        }
        if self.max_batch_size == 0 {
            return Err(IndexerError::Config("max_batch_size must be at least 1".into()));
        }
        if self.max_reorg_depth == 0 {
            return Err(IndexerError::Config("max_reorg_depth must be at least 1".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(IndexerError::Config("request_timeout_ms must be positive".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(IndexerError::Config("retry multiplier must be >= 1.0".into()));
        }
        if !(0.0..1.0).contains(&self.retry.jitter_fraction) {
            return Err(IndexerError::Config("jitter_fraction must be in [0, 1)".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = IndexerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_batch_size, 2000);
        assert_eq!(cfg.max_reorg_depth, 64);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(4));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let cfg = IndexerConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: IndexerConfig =
            serde_json::from_str(r#"{"id":"node-1","max_reorg_depth":12}"#).unwrap();
        assert_eq!(cfg.id, "node-1");
        assert_eq!(cfg.max_reorg_depth, 12);
        assert_eq!(cfg.retry, RetryConfig::default());
    }
}
