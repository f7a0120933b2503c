//! Point-in-time snapshot of pipeline health.
//!
//! The pipeline republishes a [`PipelineStatus`] after every state change;
//! metrics and health endpoints only ever read the latest snapshot.

use std::collections::BTreeMap;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::chain::EndpointStats;
use crate::error::IndexerError;
use crate::state::PipelineState;

/// The most recent error the pipeline hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub fatal: bool,
    pub height: Option<u64>,
    /// Unix seconds.
    pub at: i64,
}

impl ErrorReport {
    pub fn from_error(err: &IndexerError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            fatal: err.is_fatal(),
            height: err.height(),
            at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Cached pipeline state read by metrics and health checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub checkpoint_height: Option<u64>,
    pub checkpoint_hash: Option<B256>,
    pub chain_head: Option<u64>,
    pub events_applied: u64,
    /// Logs with an unrecognized signature.
    pub events_skipped: u64,
    pub events_retracted: u64,
    pub blocks_indexed: u64,
    pub reorgs: u64,
    pub provider_retries: u64,
    pub batch_size: u64,
    /// Throughput of the most recent batch.
    pub blocks_per_second: f64,
    pub last_error: Option<ErrorReport>,
    /// Error counts by [`IndexerError::kind`].
    pub errors: BTreeMap<String, u64>,
    /// RPC endpoint health, when the client reports it.
    #[serde(default)]
    pub endpoints: Vec<EndpointStats>,
    /// Unix seconds of the last snapshot update.
    pub updated_at: i64,
}

impl PipelineStatus {
    pub fn new(batch_size: u64) -> Self {
        Self {
            state: PipelineState::Idle,
            checkpoint_height: None,
            checkpoint_hash: None,
            chain_head: None,
            events_applied: 0,
            events_skipped: 0,
            events_retracted: 0,
            blocks_indexed: 0,
            reorgs: 0,
            provider_retries: 0,
            batch_size,
            blocks_per_second: 0.0,
            last_error: None,
            errors: BTreeMap::new(),
            endpoints: Vec::new(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Blocks between the checkpoint and the chain head (the staleness gap).
    pub fn blocks_behind(&self) -> Option<u64> {
        let head = self.chain_head?;
        Some(head.saturating_sub(self.checkpoint_height.unwrap_or(0)))
    }

    pub fn is_halted(&self) -> bool {
        self.state == PipelineState::Halted
    }

    pub fn record_error(&mut self, err: &IndexerError) {
        *self.errors.entry(err.kind().to_string()).or_default() += 1;
        self.last_error = Some(ErrorReport::from_error(err));
    }
}
