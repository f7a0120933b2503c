//! Fluent builder API for creating ingestion pipelines.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use indexflow_evm::{IndexerBuilder, RpcChainClient};
//! use indexflow_storage::MemoryStore;
//!
//! # fn main() -> Result<(), indexflow_core::IndexerError> {
//! let client = RpcChainClient::new("http://localhost:8545", Duration::from_secs(30))?;
//! let pipeline = IndexerBuilder::new()
//!     .id("staking")
//!     .start_height(19_000_000)
//!     .max_reorg_depth(64)
//!     .max_batch_size(500)
//!     .contract("0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap())
//!     .build(client, Arc::new(MemoryStore::new()))?;
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use alloy_primitives::{Address, B256};

use indexflow_core::{ChainClient, IndexStore, IndexerConfig, IndexerError, LogFilter, RetryConfig};

use crate::decoder::LogDecoder;
use crate::pipeline::Pipeline;

/// Fluent builder for [`IndexerConfig`] and [`Pipeline`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    decoder: Option<LogDecoder>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            decoder: None,
        }
    }

    /// Set the indexer ID (used as the writer claim owner).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.config.chain_id = chain_id;
        self
    }

    /// First height to index when no checkpoint exists.
    pub fn start_height(mut self, height: u64) -> Self {
        self.config.start_height = height;
        self
    }

    /// Upper bound on blocks per `eth_getLogs` batch.
    pub fn max_batch_size(mut self, size: u64) -> Self {
        self.config.max_batch_size = size;
        self
    }

    /// Consecutive successful batches before the batch size doubles.
    pub fn batch_growth_after(mut self, n: u32) -> Self {
        self.config.batch_growth_after = n;
        self
    }

    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.config.max_reorg_depth = depth;
        self
    }

    /// Set the poll interval used once caught up with the head.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Replace the log filter.
    pub fn filter(mut self, filter: LogFilter) -> Self {
        self.config.filter = filter;
        self
    }

    /// Watch one more contract address.
    pub fn contract(mut self, address: Address) -> Self {
        self.config.filter.addresses.push(address);
        self
    }

    /// Only fetch logs with this topic0.
    pub fn topic0(mut self, topic: B256) -> Self {
        self.config.filter.topic0s.push(topic);
        self
    }

    /// Use a custom event catalog instead of the staking events.
    pub fn decoder(mut self, decoder: LogDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the config and assemble the pipeline.
    pub fn build<C, S>(self, client: C, store: Arc<S>) -> Result<Pipeline<C, S>, IndexerError>
    where
        C: ChainClient,
        S: IndexStore,
    {
        let pipeline = Pipeline::new(self.config, client, store)?;
        Ok(match self.decoder {
            Some(decoder) => pipeline.with_decoder(decoder),
            None => pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.id, "indexflow");
        assert_eq!(cfg.max_reorg_depth, 64);
        assert_eq!(cfg.max_batch_size, 2000);
        assert!(cfg.filter.addresses.is_empty());
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .id("my-indexer")
            .chain_id(137)
            .start_height(50_000_000)
            .max_reorg_depth(32)
            .max_batch_size(500)
            .poll_interval_ms(1_000)
            .build_config();

        assert_eq!(cfg.id, "my-indexer");
        assert_eq!(cfg.chain_id, 137);
        assert_eq!(cfg.start_height, 50_000_000);
        assert_eq!(cfg.max_reorg_depth, 32);
        assert_eq!(cfg.max_batch_size, 500);
        assert_eq!(cfg.poll_interval_ms, 1_000);
    }

    #[test]
    fn contracts_accumulate() {
        let cfg = IndexerBuilder::new()
            .contract(Address::repeat_byte(1))
            .contract(Address::repeat_byte(2))
            .topic0(B256::repeat_byte(3))
            .build_config();
        assert_eq!(cfg.filter.addresses.len(), 2);
        assert_eq!(cfg.filter.topic0s, vec![B256::repeat_byte(3)]);
    }
}
