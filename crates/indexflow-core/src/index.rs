//! The index projection and the store contract the pipeline writes through.
//!
//! Account records are a deterministic fold of [`DomainEvent`]s in
//! `(height, log_index)` order. Retraction applies the exact inverse of each
//! event in reverse order, so a rolled-back fork leaves no trace in the
//! projection while its journal entries stay behind, marked retracted.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointStore, WriterClaim};
use crate::error::IndexerError;
use crate::event::{DomainEvent, EventKind, Provenance};
use crate::types::BlockRef;

// ─── AccountRecord ────────────────────────────────────────────────────────────

/// Materialized per-account state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub deposited: U256,
    pub withdrawn: U256,
    pub slashed: U256,
    pub rewards_claimed: U256,
    /// Number of live usage proofs.
    pub usage_proofs: u64,
}

impl AccountRecord {
    /// Current stake: deposits minus withdrawals and slashing.
    pub fn staked(&self) -> U256 {
        self.deposited
            .saturating_sub(self.withdrawn)
            .saturating_sub(self.slashed)
    }

    pub fn apply(&mut self, kind: &EventKind) {
        match kind {
            EventKind::StakeDeposited { amount, .. } => {
                self.deposited = self.deposited.saturating_add(*amount)
            }
            EventKind::StakeWithdrawn { amount, .. } => {
                self.withdrawn = self.withdrawn.saturating_add(*amount)
            }
            EventKind::StakeSlashed { amount, .. } => {
                self.slashed = self.slashed.saturating_add(*amount)
            }
            EventKind::RewardsClaimed { amount, .. } => {
                self.rewards_claimed = self.rewards_claimed.saturating_add(*amount)
            }
            EventKind::UsageProofSubmitted { .. } => self.usage_proofs += 1,
        }
    }

    /// Exact inverse of [`apply`](Self::apply) for an event that was applied.
    pub fn revert(&mut self, kind: &EventKind) {
        match kind {
            EventKind::StakeDeposited { amount, .. } => {
                self.deposited = self.deposited.saturating_sub(*amount)
            }
            EventKind::StakeWithdrawn { amount, .. } => {
                self.withdrawn = self.withdrawn.saturating_sub(*amount)
            }
            EventKind::StakeSlashed { amount, .. } => {
                self.slashed = self.slashed.saturating_sub(*amount)
            }
            EventKind::RewardsClaimed { amount, .. } => {
                self.rewards_claimed = self.rewards_claimed.saturating_sub(*amount)
            }
            EventKind::UsageProofSubmitted { .. } => {
                self.usage_proofs = self.usage_proofs.saturating_sub(1)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One submitted usage proof, as seen by the proof-of-usage evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageProof {
    pub account: Address,
    pub proof_id: B256,
    pub poi_root: B256,
    pub interactions: u64,
    pub provenance: Provenance,
}

impl UsageProof {
    pub fn from_event(event: &DomainEvent) -> Option<Self> {
        match &event.kind {
            EventKind::UsageProofSubmitted {
                account,
                proof_id,
                poi_root,
                interactions,
            } => Some(Self {
                account: *account,
                proof_id: *proof_id,
                poi_root: *poi_root,
                interactions: *interactions,
                provenance: event.provenance,
            }),
            _ => None,
        }
    }
}

// ─── Projection ───────────────────────────────────────────────────────────────

/// In-memory fold of domain events. Used directly by the memory store and as
/// the reference model for replay checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    accounts: BTreeMap<Address, AccountRecord>,
    proofs: BTreeMap<Address, Vec<UsageProof>>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `events` in order into a fresh projection.
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a DomainEvent>) -> Self {
        let mut p = Self::new();
        for e in events {
            p.apply(e);
        }
        p
    }

    pub fn apply(&mut self, event: &DomainEvent) {
        let account = event.kind.account();
        let record = self.accounts.entry(account).or_default();
        record.apply(&event.kind);
        // A zero-amount event alone leaves nothing to report.
        if record.is_empty() {
            self.accounts.remove(&account);
        }
        if let Some(proof) = UsageProof::from_event(event) {
            let list = self.proofs.entry(account).or_default();
            let pos = list.partition_point(|p| p.provenance.position() < proof.provenance.position());
            list.insert(pos, proof);
        }
    }

    pub fn revert(&mut self, event: &DomainEvent) {
        let account = event.kind.account();
        if let Some(record) = self.accounts.get_mut(&account) {
            record.revert(&event.kind);
            if record.is_empty() {
                self.accounts.remove(&account);
            }
        }
        if matches!(event.kind, EventKind::UsageProofSubmitted { .. }) {
            if let Some(list) = self.proofs.get_mut(&account) {
                list.retain(|p| p.provenance.id() != event.id());
                if list.is_empty() {
                    self.proofs.remove(&account);
                }
            }
        }
    }

    pub fn account(&self, account: &Address) -> Option<&AccountRecord> {
        self.accounts.get(account)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &AccountRecord)> {
        self.accounts.iter()
    }

    pub fn usage_proofs(&self, account: &Address) -> &[UsageProof] {
        self.proofs.get(account).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn usage_proofs_since(&self, account: &Address, from_height: u64) -> u64 {
        self.usage_proofs(account)
            .iter()
            .filter(|p| p.provenance.block_number >= from_height)
            .count() as u64
    }

    pub fn total_staked(&self) -> U256 {
        self.accounts
            .values()
            .fold(U256::ZERO, |acc, r| acc.saturating_add(r.staked()))
    }
}

// ─── Store contract ───────────────────────────────────────────────────────────

/// One batch: events plus the checkpoint advance that covers them.
///
/// Stores apply a commit as a single atomic unit.
#[derive(Debug, Clone)]
pub struct Commit {
    /// Live checkpoint this batch builds on.
    pub expected: Option<Checkpoint>,
    /// Checkpoint after the batch.
    pub next: Checkpoint,
    /// Headers observed for this batch, recorded for later reorg checks.
    pub blocks: Vec<BlockRef>,
    /// Recorded headers below this height may be pruned.
    pub retain_from: u64,
    /// Decoded events, in `(height, log_index)` order.
    pub events: Vec<DomainEvent>,
}

impl Commit {
    /// Checks the batch is internally ordered and covered by `next`.
    pub fn validate(&self) -> Result<(), IndexerError> {
        let floor = self.expected.as_ref().map(|c| c.height);
        if floor.is_some_and(|f| self.next.height <= f) {
            return Err(IndexerError::CheckpointConflict(format!(
                "commit does not advance: {} -> {}",
                self.expected.as_ref().map(|c| c.height).unwrap_or_default(),
                self.next.height
            )));
        }
        let mut last: Option<(u64, u64)> = None;
        for e in &self.events {
            let pos = e.provenance.position();
            let h = pos.0;
            if h > self.next.height || floor.is_some_and(|f| h <= f) {
                return Err(IndexerError::Storage(format!(
                    "event {} at height {h} outside commit range",
                    e.id()
                )));
            }
            if last.is_some_and(|l| l >= pos) {
                return Err(IndexerError::Storage(format!(
                    "events out of order at {}:{}",
                    pos.0, pos.1
                )));
            }
            last = Some(pos);
        }
        Ok(())
    }
}

/// Result of a successful [`IndexStore::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Events newly folded into the projection.
    pub applied: u64,
    /// Events whose provenance key was already live.
    pub duplicates: u64,
}

/// Move the checkpoint back to `to`, retracting everything above it.
///
/// `to == None` rewinds to "not started".
#[derive(Debug, Clone)]
pub struct Rollback {
    pub expected: Checkpoint,
    pub to: Option<Checkpoint>,
}

impl Rollback {
    /// Lowest height whose events are retracted.
    pub fn from_height(&self) -> u64 {
        self.to.as_ref().map(|c| c.height + 1).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetractOutcome {
    pub retracted: u64,
}

/// A recorded retraction, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetractionRecord {
    pub from_height: u64,
    pub to_height: u64,
    pub events: u64,
    pub retracted_at: i64,
}

/// Read-only, snapshot-consistent queries over the projection.
#[async_trait]
pub trait IndexReader: Send + Sync {
    async fn account(&self, account: Address) -> Result<Option<AccountRecord>, IndexerError>;

    /// Usage proofs for `account` in `(height, log_index)` order.
    async fn usage_proofs(&self, account: Address) -> Result<Vec<UsageProof>, IndexerError>;

    /// Live usage proofs at or above `from_height` (rolling window).
    async fn usage_proofs_since(
        &self,
        account: Address,
        from_height: u64,
    ) -> Result<u64, IndexerError>;

    async fn total_staked(&self) -> Result<U256, IndexerError>;
}

/// The pipeline's write path: index updates and checkpoint moves, atomically.
#[async_trait]
pub trait IndexStore: CheckpointStore + IndexReader {
    /// Fold `commit.events` and advance to `commit.next` as one unit.
    ///
    /// Events whose provenance key is already live are skipped.
    async fn apply(&self, claim: &WriterClaim, commit: Commit) -> Result<ApplyOutcome, IndexerError>;

    /// Retract every event above `rollback.to` and move the checkpoint there.
    ///
    /// Idempotent: if the checkpoint is already at `rollback.to` nothing happens.
    async fn retract(
        &self,
        claim: &WriterClaim,
        rollback: Rollback,
    ) -> Result<RetractOutcome, IndexerError>;

    /// Recorded header at `height`, if still retained.
    async fn block_ref(&self, height: u64) -> Result<Option<BlockRef>, IndexerError>;

    /// Audit trail of past retractions, oldest first.
    async fn retractions(&self) -> Result<Vec<RetractionRecord>, IndexerError>;

    /// Locally recorded hash at `height`: the header at `height`, or the
    /// parent hash carried by the header at `height + 1`.
    async fn local_hash(&self, height: u64) -> Result<Option<B256>, IndexerError> {
        if let Some(b) = self.block_ref(height).await? {
            return Ok(Some(b.hash));
        }
        Ok(self.block_ref(height + 1).await?.map(|b| b.parent_hash))
    }
}
