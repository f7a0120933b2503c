//! Reorg detection.
//!
//! Compares the checkpoint against the chain's current block at the same
//! height. On a mismatch, walks backward through the locally recorded headers
//! until the local and canonical hashes agree again, bounded by the
//! configured maximum reorg depth.

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::error::IndexerError;
use crate::types::BlockRef;

/// Where the detector reads hashes from.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// The chain's canonical block at `height`, if it exists.
    async fn canonical_block(&self, height: u64) -> Result<Option<BlockRef>, IndexerError>;

    /// The hash the index recorded for `height`, if known.
    async fn local_hash(&self, height: u64) -> Result<Option<B256>, IndexerError>;
}

/// Describes a detected chain reorganization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    /// Checkpoint height at which the fork was noticed.
    pub detected_at: u64,
    /// Hash the index holds for `detected_at`.
    pub expected: B256,
    /// Hash the chain now reports for `detected_at` (`None` if the chain is shorter).
    pub actual: Option<B256>,
    /// Last block both sides agree on; `None` means nothing indexed survives.
    pub common_ancestor: Option<BlockRef>,
    /// Number of indexed blocks to roll back.
    pub depth: u64,
}

impl ReorgEvent {
    /// The checkpoint to roll back to.
    pub fn rollback_target(&self) -> Option<Checkpoint> {
        self.common_ancestor.as_ref().map(Checkpoint::at)
    }
}

/// The detector's verdict for the current checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgDecision {
    /// The checkpoint block is still canonical.
    Continue,
    /// The checkpoint block was replaced; roll back to the common ancestor.
    Reorg(ReorgEvent),
}

/// Detects reorgs against the stored checkpoint.
#[derive(Debug, Clone)]
pub struct ReorgDetector {
    max_depth: u64,
    /// Lowest height the index ever holds events for.
    start_height: u64,
}

impl ReorgDetector {
    pub fn new(max_depth: u64, start_height: u64) -> Self {
        Self {
            max_depth,
            start_height,
        }
    }

    pub fn max_depth(&self) -> u64 {
        self.max_depth
    }

    /// Decide whether to continue from `checkpoint` or roll back.
    ///
    /// Returns [`IndexerError::UnrecoverableReorg`] if no common ancestor is
    /// found within `max_depth` blocks.
    pub async fn check<B: BlockSource + ?Sized>(
        &self,
        checkpoint: &Checkpoint,
        source: &B,
    ) -> Result<ReorgDecision, IndexerError> {
        let actual = source.canonical_block(checkpoint.height).await?;
        if actual.is_some_and(|b| b.hash == checkpoint.block_hash) {
            return Ok(ReorgDecision::Continue);
        }

        tracing::warn!(
            height = checkpoint.height,
            expected = %checkpoint.block_hash,
            actual = ?actual.map(|b| b.hash),
            "Checkpoint block no longer canonical, searching for common ancestor"
        );

        for depth in 1..=self.max_depth {
            let candidate = checkpoint
                .height
                .checked_sub(depth)
                .filter(|h| *h >= self.start_height);

            let Some(height) = candidate else {
                // Every indexed height disagrees; rewind to before the start.
                return Ok(self.reorg(checkpoint, actual, None, depth));
            };

            let Some(local) = source.local_hash(height).await? else {
                continue;
            };
            let Some(canonical) = source.canonical_block(height).await? else {
                continue;
            };
            if canonical.hash == local {
                return Ok(self.reorg(checkpoint, actual, Some(canonical), depth));
            }
        }

        tracing::error!(
            height = checkpoint.height,
            hash = %checkpoint.block_hash,
            max_depth = self.max_depth,
            "No common ancestor within reorg bound"
        );
        Err(IndexerError::UnrecoverableReorg {
            height: checkpoint.height,
            hash: checkpoint.block_hash,
            max_depth: self.max_depth,
        })
    }

    fn reorg(
        &self,
        checkpoint: &Checkpoint,
        actual: Option<BlockRef>,
        common_ancestor: Option<BlockRef>,
        depth: u64,
    ) -> ReorgDecision {
        tracing::warn!(
            depth,
            at = checkpoint.height,
            ancestor = ?common_ancestor.map(|b| b.number),
            "Reorg detected"
        );
        ReorgDecision::Reorg(ReorgEvent {
            detected_at: checkpoint.height,
            expected: checkpoint.block_hash,
            actual: actual.map(|b| b.hash),
            common_ancestor,
            depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn hash(fork: u8, n: u64) -> B256 {
        let mut b = [fork; 32];
        b[24..].copy_from_slice(&n.to_be_bytes());
        B256::from(b)
    }

    /// Canonical chain follows fork `b` from `fork_at` upward, fork `a` below;
    /// the local view is all fork `a`.
    struct Forked {
        fork_at: u64,
        head: u64,
        local: HashMap<u64, B256>,
    }

    impl Forked {
        fn new(fork_at: u64, head: u64, local_from: u64, local_to: u64) -> Self {
            let local = (local_from..=local_to).map(|n| (n, hash(0xa, n))).collect();
            Self {
                fork_at,
                head,
                local,
            }
        }
    }

    #[async_trait]
    impl BlockSource for Forked {
        async fn canonical_block(&self, height: u64) -> Result<Option<BlockRef>, IndexerError> {
            if height > self.head {
                return Ok(None);
            }
            let fork = |n: u64| if n >= self.fork_at { 0xb } else { 0xa };
            let parent = height.saturating_sub(1);
            Ok(Some(BlockRef::new(
                height,
                hash(fork(height), height),
                hash(fork(parent), parent),
            )))
        }

        async fn local_hash(&self, height: u64) -> Result<Option<B256>, IndexerError> {
            Ok(self.local.get(&height).copied())
        }
    }

    #[tokio::test]
    async fn no_reorg_on_canonical_checkpoint() {
        let src = Forked::new(200, 120, 90, 100);
        let det = ReorgDetector::new(64, 0);
        let cp = Checkpoint::new(100, hash(0xa, 100));
        assert_eq!(det.check(&cp, &src).await.unwrap(), ReorgDecision::Continue);
    }

    #[tokio::test]
    async fn single_block_fork_rolls_back_one() {
        let src = Forked::new(100, 100, 90, 100);
        let det = ReorgDetector::new(64, 0);
        let cp = Checkpoint::new(100, hash(0xa, 100));
        let ReorgDecision::Reorg(event) = det.check(&cp, &src).await.unwrap() else {
            panic!("expected reorg");
        };
        assert_eq!(event.depth, 1);
        assert_eq!(event.actual, Some(hash(0xb, 100)));
        assert_eq!(event.rollback_target().unwrap().height, 99);
    }

    #[tokio::test]
    async fn shorter_chain_is_a_reorg() {
        let src = Forked::new(98, 99, 90, 100);
        let det = ReorgDetector::new(64, 0);
        let cp = Checkpoint::new(100, hash(0xa, 100));
        let ReorgDecision::Reorg(event) = det.check(&cp, &src).await.unwrap() else {
            panic!("expected reorg");
        };
        assert_eq!(event.actual, None);
        assert_eq!(event.depth, 3);
        assert_eq!(event.common_ancestor.unwrap().number, 97);
    }

    #[tokio::test]
    async fn deep_fork_is_unrecoverable() {
        let src = Forked::new(50, 100, 30, 100);
        let det = ReorgDetector::new(10, 0);
        let cp = Checkpoint::new(100, hash(0xa, 100));
        let err = det.check(&cp, &src).await.unwrap_err();
        assert!(matches!(err, IndexerError::UnrecoverableReorg { max_depth: 10, .. }));
    }

    #[tokio::test]
    async fn fork_below_start_rewinds_everything() {
        let src = Forked::new(0, 20, 10, 12);
        let det = ReorgDetector::new(64, 10);
        let cp = Checkpoint::new(12, hash(0xa, 12));
        let ReorgDecision::Reorg(event) = det.check(&cp, &src).await.unwrap() else {
            panic!("expected reorg");
        };
        assert_eq!(event.common_ancestor, None);
        assert_eq!(event.depth, 3);
    }

    #[tokio::test]
    async fn missing_local_history_counts_against_bound() {
        // Only the checkpoint block itself was recorded.
        let src = Forked::new(95, 120, 100, 100);
        let det = ReorgDetector::new(64, 0);
        let cp = Checkpoint::new(100, hash(0xa, 100));
        assert!(det.check(&cp, &src).await.is_err());
    }
}
