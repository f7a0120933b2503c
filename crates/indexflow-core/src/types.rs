//! Shared chain-facing types for the ingestion pipeline.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// A minimal, immutable reference to an observed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block height.
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
}

impl BlockRef {
    pub fn new(number: u64, hash: B256, parent_hash: B256) -> Self {
        Self {
            number,
            hash,
            parent_hash,
        }
    }

    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockRef) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// Uniquely identifies a log on a specific block: `(block_hash, log_index)`.
///
/// The same log re-included on another fork gets a different id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId {
    pub block_hash: B256,
    pub log_index: u64,
}

impl std::fmt::Display for LogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block_hash, self.log_index)
    }
}

/// An undecoded event log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub block_hash: B256,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    /// Emitting contract.
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// Set by the provider when the log was dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// The event signature hash, if the log has any topics.
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }

    pub fn id(&self) -> LogId {
        LogId {
            block_hash: self.block_hash,
            log_index: self.log_index,
        }
    }

    /// Canonical ordering key within a chain.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// Which logs to request from the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Contract addresses to watch (empty = all addresses).
    pub addresses: Vec<Address>,
    /// Accepted topic0 values (empty = all events).
    pub topic0s: Vec<B256>,
}

impl LogFilter {
    pub fn address(addr: Address) -> Self {
        Self {
            addresses: vec![addr],
            ..Default::default()
        }
    }

    pub fn topic0(mut self, topic: B256) -> Self {
        self.topic0s.push(topic);
        self
    }

    /// Returns `true` if `log` passes this filter.
    pub fn matches(&self, log: &RawLog) -> bool {
        let addr_ok = self.addresses.is_empty() || self.addresses.contains(&log.address);
        let topic_ok = self.topic0s.is_empty()
            || log.topic0().is_some_and(|t| self.topic0s.contains(&t));
        addr_ok && topic_ok
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn h(b: u8) -> B256 {
        B256::repeat_byte(b)
    }

    #[test]
    fn block_extends_parent() {
        let parent = BlockRef::new(100, h(0xaa), h(0x00));
        let child = BlockRef::new(101, h(0xbb), h(0xaa));
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
    }

    #[test]
    fn block_extends_false_on_gap() {
        let a = BlockRef::new(100, h(0xaa), h(0x00));
        let b = BlockRef::new(102, h(0xcc), h(0xaa)); // gap
        assert!(!b.extends(&a));
    }

    #[test]
    fn filter_matches_address_and_topic() {
        let addr = Address::repeat_byte(0x11);
        let log = RawLog {
            block_hash: h(1),
            block_number: 7,
            tx_hash: h(2),
            log_index: 0,
            address: addr,
            topics: vec![h(0xee)],
            data: Bytes::new(),
            removed: false,
        };
        assert!(LogFilter::default().matches(&log));
        assert!(LogFilter::address(addr).matches(&log));
        assert!(!LogFilter::address(Address::repeat_byte(0x22)).matches(&log));
        assert!(LogFilter::address(addr).topic0(h(0xee)).matches(&log));
        assert!(!LogFilter::default().topic0(h(0xef)).matches(&log));
    }
}
