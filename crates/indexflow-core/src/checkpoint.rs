//! Checkpoint contract: the durable "last safely indexed block" marker.
//!
//! There is exactly one live checkpoint per store. It only moves through
//! compare-and-swap writes made under a [`WriterClaim`], so two pipeline
//! processes pointed at the same store can never both commit a transition.

use alloy_primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::BlockRef;

/// The persisted indexing position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last fully indexed block height.
    pub height: u64,
    /// Hash of the block at `height` on the indexed fork.
    pub block_hash: B256,
    /// Unix timestamp (seconds) of when this checkpoint was written.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(height: u64, block_hash: B256) -> Self {
        Self {
            height,
            block_hash,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn at(block: &BlockRef) -> Self {
        Self::new(block.number, block.hash)
    }

    /// Same height and hash; `updated_at` is ignored.
    pub fn same_position(&self, other: &Checkpoint) -> bool {
        self.height == other.height && self.block_hash == other.block_hash
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.height, self.block_hash)
    }
}

/// The right to move the checkpoint, fenced by a monotonically increasing epoch.
///
/// Claiming always succeeds and bumps the epoch, so a newer process takes over
/// and every write still carrying the previous epoch is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterClaim {
    pub owner: String,
    pub epoch: u64,
}

impl std::fmt::Display for WriterClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.owner, self.epoch)
    }
}

/// Durable checkpoint storage with compare-and-swap writes.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The live checkpoint, or `None` if indexing has not started yet.
    async fn load(&self) -> Result<Option<Checkpoint>, IndexerError>;

    /// Take the writer claim for `owner`, fencing out any previous holder.
    async fn claim(&self, owner: &str) -> Result<WriterClaim, IndexerError>;

    /// The current claim holder, if any.
    async fn current_claim(&self) -> Result<Option<WriterClaim>, IndexerError>;

    /// Give up `claim`. A no-op if someone else has claimed since.
    async fn release(&self, claim: &WriterClaim) -> Result<(), IndexerError>;

    /// Replace `expected` with `next`, durably, before returning.
    ///
    /// Fails with [`IndexerError::CheckpointConflict`] if the live checkpoint
    /// is not `expected` or `claim` is no longer current.
    async fn save(
        &self,
        claim: &WriterClaim,
        expected: Option<&Checkpoint>,
        next: Checkpoint,
    ) -> Result<(), IndexerError>;
}

/// Verifies the live checkpoint matches what the writer expects.
pub fn ensure_expected(
    current: Option<&Checkpoint>,
    expected: Option<&Checkpoint>,
) -> Result<(), IndexerError> {
    let ok = match (current, expected) {
        (None, None) => true,
        (Some(c), Some(e)) => c.same_position(e),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(IndexerError::CheckpointConflict(format!(
            "expected checkpoint {}, found {}",
            describe(expected),
            describe(current)
        )))
    }
}

/// Verifies `claim` is still the current writer claim.
pub fn ensure_claim(
    current: Option<&WriterClaim>,
    claim: &WriterClaim,
) -> Result<(), IndexerError> {
    match current {
        Some(c) if c == claim => Ok(()),
        Some(c) => Err(IndexerError::CheckpointConflict(format!(
            "writer claim {claim} superseded by {c}"
        ))),
        None => Err(IndexerError::CheckpointConflict(format!(
            "writer claim {claim} was released"
        ))),
    }
}

fn describe(cp: Option<&Checkpoint>) -> String {
    cp.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_checkpoint_ignores_timestamp() {
        let a = Checkpoint {
            height: 10,
            block_hash: B256::repeat_byte(1),
            updated_at: 1,
        };
        let mut b = a.clone();
        b.updated_at = 99;
        assert!(ensure_expected(Some(&a), Some(&b)).is_ok());
        assert!(ensure_expected(None, None).is_ok());
        assert!(ensure_expected(Some(&a), None).is_err());

        b.block_hash = B256::repeat_byte(2);
        let err = ensure_expected(Some(&a), Some(&b)).unwrap_err();
        assert_eq!(err.kind(), "checkpoint_conflict");
    }

    #[test]
    fn stale_claim_is_rejected() {
        let old = WriterClaim {
            owner: "node-a".into(),
            epoch: 1,
        };
        let new = WriterClaim {
            owner: "node-b".into(),
            epoch: 2,
        };
        assert!(ensure_claim(Some(&new), &new).is_ok());
        assert!(ensure_claim(Some(&new), &old).is_err());
        assert!(ensure_claim(None, &old).is_err());
    }
}
