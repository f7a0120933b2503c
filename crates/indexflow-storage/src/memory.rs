//! In-memory index and checkpoint store.
//!
//! Keeps the event journal, projection, recorded headers and checkpoint in
//! RAM. Writes build a new projection on the side and swap it in together
//! with the checkpoint, so readers holding a [`snapshot`](MemoryStore::snapshot)
//! never see a half-applied batch. All data is lost when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use indexflow_core::checkpoint::{ensure_claim, ensure_expected};
use indexflow_core::{
    AccountRecord, ApplyOutcome, BlockRef, Checkpoint, CheckpointStore, Commit, DomainEvent,
    IndexReader, IndexStore, IndexerError, LogId, Projection, RetractOutcome, RetractionRecord,
    Rollback, UsageProof, WriterClaim,
};

use crate::Fault;

/// A journaled event. Retracted entries stay in the journal.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub event: DomainEvent,
    pub applied_at: i64,
    pub retracted_at: Option<i64>,
}

impl JournalEntry {
    pub fn is_live(&self) -> bool {
        self.retracted_at.is_none()
    }
}

#[derive(Default)]
struct State {
    checkpoint: Option<Checkpoint>,
    owner: Option<String>,
    epoch: u64,
    view: Arc<Projection>,
    journal: Vec<JournalEntry>,
    by_id: HashMap<LogId, usize>,
    blocks: BTreeMap<u64, BlockRef>,
    retractions: Vec<RetractionRecord>,
    fault: Option<Fault>,
}

impl State {
    fn claim(&self) -> Option<WriterClaim> {
        self.owner.as_ref().map(|owner| WriterClaim {
            owner: owner.clone(),
            epoch: self.epoch,
        })
    }

    fn is_live(&self, id: &LogId) -> bool {
        self.by_id
            .get(id)
            .is_some_and(|i| self.journal[*i].is_live())
    }

    fn take_fault(&mut self, fault: Fault) -> Result<(), IndexerError> {
        if self.fault == Some(fault) {
            self.fault = None;
            return Err(IndexerError::Storage(format!("injected fault: {fault}")));
        }
        Ok(())
    }
}

/// In-memory [`IndexStore`] for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Immutable view of the projection as of the last commit.
    pub fn snapshot(&self) -> Arc<Projection> {
        self.lock().view.clone()
    }

    /// Fail the next write at `fault`, leaving the store untouched.
    pub fn inject_fault(&self, fault: Fault) {
        self.lock().fault = Some(fault);
    }

    /// Full journal including retracted entries, in insertion order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }

    /// Live events in `(height, log_index)` order.
    pub fn live_events(&self) -> Vec<DomainEvent> {
        let st = self.lock();
        let mut events: Vec<_> = st
            .journal
            .iter()
            .filter(|e| e.is_live())
            .map(|e| e.event.clone())
            .collect();
        events.sort_by_key(|e| e.provenance.position());
        events
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.lock().checkpoint.clone())
    }

    async fn claim(&self, owner: &str) -> Result<WriterClaim, IndexerError> {
        let mut st = self.lock();
        st.epoch += 1;
        st.owner = Some(owner.to_string());
        Ok(WriterClaim {
            owner: owner.to_string(),
            epoch: st.epoch,
        })
    }

    async fn current_claim(&self) -> Result<Option<WriterClaim>, IndexerError> {
        Ok(self.lock().claim())
    }

    async fn release(&self, claim: &WriterClaim) -> Result<(), IndexerError> {
        let mut st = self.lock();
        if st.claim().as_ref() == Some(claim) {
            st.owner = None;
        }
        Ok(())
    }

    async fn save(
        &self,
        claim: &WriterClaim,
        expected: Option<&Checkpoint>,
        next: Checkpoint,
    ) -> Result<(), IndexerError> {
        let mut st = self.lock();
        ensure_claim(st.claim().as_ref(), claim)?;
        ensure_expected(st.checkpoint.as_ref(), expected)?;
        st.take_fault(Fault::BeforeCheckpointWrite)?;
        st.checkpoint = Some(next);
        Ok(())
    }
}

#[async_trait]
impl IndexReader for MemoryStore {
    async fn account(&self, account: Address) -> Result<Option<AccountRecord>, IndexerError> {
        Ok(self.snapshot().account(&account).cloned())
    }

    async fn usage_proofs(&self, account: Address) -> Result<Vec<UsageProof>, IndexerError> {
        Ok(self.snapshot().usage_proofs(&account).to_vec())
    }

    async fn usage_proofs_since(
        &self,
        account: Address,
        from_height: u64,
    ) -> Result<u64, IndexerError> {
        Ok(self.snapshot().usage_proofs_since(&account, from_height))
    }

    async fn total_staked(&self) -> Result<U256, IndexerError> {
        Ok(self.snapshot().total_staked())
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn apply(&self, claim: &WriterClaim, commit: Commit) -> Result<ApplyOutcome, IndexerError> {
        let mut st = self.lock();
        ensure_claim(st.claim().as_ref(), claim)?;
        let replayed = st.checkpoint.as_ref().is_some_and(|c| c.same_position(&commit.next))
            && commit.events.iter().all(|e| st.is_live(&e.id()));
        if replayed {
            return Ok(ApplyOutcome {
                applied: 0,
                duplicates: commit.events.len() as u64,
            });
        }
        ensure_expected(st.checkpoint.as_ref(), commit.expected.as_ref())?;
        commit.validate()?;

        let now = chrono::Utc::now().timestamp();
        let mut view = (*st.view).clone();
        let mut outcome = ApplyOutcome::default();
        let mut fresh: Vec<DomainEvent> = Vec::new();
        let mut revived: Vec<usize> = Vec::new();

        for event in commit.events {
            let id = event.id();
            if st.is_live(&id) || fresh.iter().any(|e| e.id() == id) {
                outcome.duplicates += 1;
                continue;
            }
            view.apply(&event);
            outcome.applied += 1;
            match st.by_id.get(&id) {
                Some(i) => revived.push(*i),
                None => fresh.push(event),
            }
        }

        st.take_fault(Fault::BeforeCheckpointWrite)?;

        for i in revived {
            st.journal[i].retracted_at = None;
            st.journal[i].applied_at = now;
        }
        for event in fresh {
            let idx = st.journal.len();
            st.by_id.insert(event.id(), idx);
            st.journal.push(JournalEntry {
                event,
                applied_at: now,
                retracted_at: None,
            });
        }
        for block in commit.blocks {
            st.blocks.insert(block.number, block);
        }
        st.blocks.retain(|n, _| *n >= commit.retain_from);
        st.view = Arc::new(view);
        st.checkpoint = Some(commit.next);
        Ok(outcome)
    }

    async fn retract(
        &self,
        claim: &WriterClaim,
        rollback: Rollback,
    ) -> Result<RetractOutcome, IndexerError> {
        let mut st = self.lock();
        ensure_claim(st.claim().as_ref(), claim)?;
        let already = match (&st.checkpoint, &rollback.to) {
            (None, None) => true,
            (Some(c), Some(t)) => c.same_position(t),
            _ => false,
        };
        if already {
            return Ok(RetractOutcome::default());
        }
        ensure_expected(st.checkpoint.as_ref(), Some(&rollback.expected))?;

        let from = rollback.from_height();
        let mut doomed: Vec<usize> = st
            .journal
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_live() && e.event.block_number() >= from)
            .map(|(i, _)| i)
            .collect();
        doomed.sort_by_key(|i| std::cmp::Reverse(st.journal[*i].event.provenance.position()));

        let mut view = (*st.view).clone();
        for i in &doomed {
            view.revert(&st.journal[*i].event);
        }

        st.take_fault(Fault::BeforeCheckpointWrite)?;

        let now = chrono::Utc::now().timestamp();
        for i in &doomed {
            st.journal[*i].retracted_at = Some(now);
        }
        st.blocks.retain(|n, _| *n < from);
        st.view = Arc::new(view);
        st.retractions.push(RetractionRecord {
            from_height: from,
            to_height: rollback.expected.height,
            events: doomed.len() as u64,
            retracted_at: now,
        });
        st.checkpoint = rollback.to;
        Ok(RetractOutcome {
            retracted: doomed.len() as u64,
        })
    }

    async fn block_ref(&self, height: u64) -> Result<Option<BlockRef>, IndexerError> {
        Ok(self.lock().blocks.get(&height).copied())
    }

    async fn retractions(&self) -> Result<Vec<RetractionRecord>, IndexerError> {
        Ok(self.lock().retractions.clone())
    }
}
