//! Error types for the ingestion pipeline.

use alloy_primitives::B256;
use thiserror::Error;

/// How the pipeline must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retried (or bisected) automatically; only surfaced once retries run out.
    Transient,
    /// Halts the pipeline; requires operator intervention.
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The RPC provider failed, timed out or rate-limited us.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider refused a `eth_getLogs` range; the caller must bisect.
    #[error("log range {from}..={to} too large for provider")]
    RangeTooLarge { from: u64, to: u64 },

    /// Headers or logs fetched for one batch disagree with each other.
    #[error("inconsistent chain view at block {height}: {reason}")]
    InconsistentView { height: u64, reason: String },

    /// A log matched a known event signature but its payload did not decode.
    #[error("corrupt {event} log at block {height} ({block_hash}) index {log_index}, tx {tx_hash}: {reason}")]
    CorruptLog {
        event: &'static str,
        height: u64,
        block_hash: B256,
        tx_hash: B256,
        log_index: u64,
        reason: String,
    },

    /// No common ancestor within the configured reorg depth.
    #[error("unrecoverable reorg below checkpoint {height} ({hash}): no common ancestor within {max_depth} blocks")]
    UnrecoverableReorg {
        height: u64,
        hash: B256,
        max_depth: u64,
    },

    /// The checkpoint or writer claim changed underneath us.
    #[error("checkpoint conflict: {0}")]
    CheckpointConflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// A transient operation kept failing past the retry budget.
    #[error("{op} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        last: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Shutdown was requested while an operation was in flight.
    #[error("aborted: {0}")]
    Aborted(String),
}

impl IndexerError {
    /// Returns the severity class of this error.
    pub fn severity(&self) -> Severity {
        match self {
            Self::ProviderUnavailable(_)
            | Self::RangeTooLarge { .. }
            | Self::InconsistentView { .. }
            | Self::Aborted(_) => Severity::Transient,
            Self::CorruptLog { .. }
            | Self::UnrecoverableReorg { .. }
            | Self::CheckpointConflict(_)
            | Self::Storage(_)
            | Self::RetriesExhausted { .. }
            | Self::Config(_) => Severity::Fatal,
        }
    }

    /// Returns `true` if a single call may simply be retried after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }

    /// Returns `true` if the pipeline must halt on this error.
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Stable snake_case label, used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::RangeTooLarge { .. } => "range_too_large",
            Self::InconsistentView { .. } => "inconsistent_view",
            Self::CorruptLog { .. } => "corrupt_log",
            Self::UnrecoverableReorg { .. } => "unrecoverable_reorg",
            Self::CheckpointConflict(_) => "checkpoint_conflict",
            Self::Storage(_) => "storage",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Config(_) => "config",
            Self::Aborted(_) => "aborted",
        }
    }

    /// Block height the error refers to, if any.
    pub fn height(&self) -> Option<u64> {
        match self {
            Self::RangeTooLarge { from, .. } => Some(*from),
            Self::InconsistentView { height, .. }
            | Self::CorruptLog { height, .. }
            | Self::UnrecoverableReorg { height, .. } => Some(*height),
            _ => None,
        }
    }
}
