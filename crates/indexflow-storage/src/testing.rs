//! Fixtures shared by the store tests.

use alloy_primitives::{Address, B256, U256};

use indexflow_core::{BlockRef, Checkpoint, Commit, DomainEvent, EventKind, Provenance};

pub fn block_hash(fork: u8, n: u64) -> B256 {
    let mut b = [fork; 32];
    b[24..].copy_from_slice(&n.to_be_bytes());
    B256::from(b)
}

pub fn block(fork: u8, n: u64) -> BlockRef {
    BlockRef::new(n, block_hash(fork, n), block_hash(fork, n.saturating_sub(1)))
}

pub fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn bob() -> Address {
    Address::repeat_byte(0xb0)
}

pub fn deposit(height: u64, log_index: u64, account: Address, amount: u64) -> DomainEvent {
    DomainEvent {
        provenance: Provenance {
            block_number: height,
            block_hash: block_hash(0xa, height),
            tx_hash: B256::with_last_byte(log_index as u8),
            log_index,
        },
        address: Address::repeat_byte(0xcc),
        kind: EventKind::StakeDeposited {
            account,
            amount: U256::from(amount),
        },
    }
}

pub fn usage_proof(height: u64, log_index: u64, account: Address) -> DomainEvent {
    DomainEvent {
        provenance: Provenance {
            block_number: height,
            block_hash: block_hash(0xa, height),
            tx_hash: B256::with_last_byte(log_index as u8),
            log_index,
        },
        address: Address::repeat_byte(0xcc),
        kind: EventKind::UsageProofSubmitted {
            account,
            proof_id: B256::with_last_byte(height as u8),
            poi_root: B256::repeat_byte(0x77),
            interactions: 12,
        },
    }
}

/// A commit on fork `0xa` from `expected` to `height`.
pub fn commit(expected: Option<Checkpoint>, height: u64, events: Vec<DomainEvent>) -> Commit {
    Commit {
        expected,
        next: Checkpoint::new(height, block_hash(0xa, height)),
        blocks: vec![block(0xa, height)],
        retain_from: 0,
        events,
    }
}
