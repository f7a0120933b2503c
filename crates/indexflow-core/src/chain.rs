//! The narrow interface the pipeline uses to talk to a chain node.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::{BlockRef, LogFilter, RawLog};

/// Health counters for one RPC endpoint behind a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub url: String,
    /// Calls the endpoint refused with a rate limit.
    pub rate_limited: u64,
    pub cooling_down: bool,
    /// Permanently taken out of rotation.
    pub disabled: bool,
}

impl EndpointStats {
    pub fn is_available(&self) -> bool {
        !self.cooling_down && !self.disabled
    }
}

/// Read-only access to a chain node.
///
/// Implementations perform no retries: every method returns at most once per
/// call and reports failures as [`IndexerError::ProviderUnavailable`] or
/// [`IndexerError::RangeTooLarge`]. Retry, timeout and bisection policy live
/// in the pipeline.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain head.
    async fn head_block(&self) -> Result<BlockRef, IndexerError>;

    /// Canonical block at `height`, or `None` if the chain is not that long.
    async fn block_by_height(&self, height: u64) -> Result<Option<BlockRef>, IndexerError>;

    /// All logs in `from..=to` matching `filter`, ordered by `(height, log_index)`.
    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError>;

    /// Per-endpoint health, for clients that spread calls over several nodes.
    fn endpoint_stats(&self) -> Vec<EndpointStats> {
        Vec::new()
    }
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for std::sync::Arc<T> {
    async fn head_block(&self) -> Result<BlockRef, IndexerError> {
        (**self).head_block().await
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<BlockRef>, IndexerError> {
        (**self).block_by_height(height).await
    }

    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        (**self).logs_in_range(from, to, filter).await
    }

    fn endpoint_stats(&self) -> Vec<EndpointStats> {
        (**self).endpoint_stats()
    }
}
