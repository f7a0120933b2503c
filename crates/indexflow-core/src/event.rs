//! Typed domain events produced by the log decoder.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::types::{LogId, RawLog};

/// Where on-chain a domain event came from.
///
/// `(block_hash, log_index)` is the idempotency key; `(block_number, log_index)`
/// is the application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl Provenance {
    pub fn of(log: &RawLog) -> Self {
        Self {
            block_number: log.block_number,
            block_hash: log.block_hash,
            tx_hash: log.tx_hash,
            log_index: log.log_index,
        }
    }

    pub fn id(&self) -> LogId {
        LogId {
            block_hash: self.block_hash,
            log_index: self.log_index,
        }
    }

    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Decoded payload of a known contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StakeDeposited {
        account: Address,
        amount: U256,
    },
    StakeWithdrawn {
        account: Address,
        amount: U256,
    },
    /// Governance slashing; `recipient` receives the slashed amount.
    StakeSlashed {
        account: Address,
        amount: U256,
        recipient: Address,
    },
    RewardsClaimed {
        account: Address,
        amount: U256,
    },
    UsageProofSubmitted {
        account: Address,
        proof_id: B256,
        poi_root: B256,
        interactions: u64,
    },
}

impl EventKind {
    /// The account whose record this event updates.
    pub fn account(&self) -> Address {
        match self {
            Self::StakeDeposited { account, .. }
            | Self::StakeWithdrawn { account, .. }
            | Self::StakeSlashed { account, .. }
            | Self::RewardsClaimed { account, .. }
            | Self::UsageProofSubmitted { account, .. } => *account,
        }
    }

    /// Solidity event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StakeDeposited { .. } => "StakeDeposited",
            Self::StakeWithdrawn { .. } => "StakeWithdrawn",
            Self::StakeSlashed { .. } => "StakeSlashed",
            Self::RewardsClaimed { .. } => "RewardsClaimed",
            Self::UsageProofSubmitted { .. } => "UsageProofSubmitted",
        }
    }
}

/// A decoded event together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub provenance: Provenance,
    /// Emitting contract.
    pub address: Address,
    pub kind: EventKind,
}

impl DomainEvent {
    pub fn id(&self) -> LogId {
        self.provenance.id()
    }

    pub fn block_number(&self) -> u64 {
        self.provenance.block_number
    }
}
