//! Scriptable in-process chain for pipeline tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use alloy_primitives::{keccak256, Address, LogData, B256, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;

use indexflow_core::{BlockRef, ChainClient, IndexerError, LogFilter, RawLog, RetryConfig};
use indexflow_evm::decoder::{StakeDeposited, UsageProofSubmitted};
use indexflow_evm::IndexerBuilder;

pub fn contract() -> Address {
    Address::repeat_byte(0x5a)
}

pub fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn bob() -> Address {
    Address::repeat_byte(0xb0)
}

/// Builder with fast retries suitable for tests.
pub fn builder() -> IndexerBuilder {
    IndexerBuilder::new()
        .id("test")
        .poll_interval_ms(10)
        .request_timeout_ms(1_000)
        .retry(RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
            jitter_fraction: 0.0,
        })
}

struct Block {
    header: BlockRef,
    logs: Vec<RawLog>,
}

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<u64, Block>,
    label: String,
    max_range: Option<u64>,
    failures: u32,
    delay: Option<Duration>,
    requested: Vec<(u64, u64)>,
}

impl Inner {
    fn push_block(&mut self) {
        let number = self.blocks.keys().next_back().map_or(0, |n| n + 1);
        let parent_hash = match number.checked_sub(1) {
            Some(p) => self.blocks[&p].header.hash,
            None => B256::ZERO,
        };
        let hash = MockChain::hash_for(&self.label, number);
        self.blocks.insert(
            number,
            Block {
                header: BlockRef::new(number, hash, parent_hash),
                logs: Vec::new(),
            },
        );
    }
}

/// A chain of empty blocks `0..=tip` whose hashes derive from a fork label.
pub struct MockChain {
    inner: Mutex<Inner>,
}

impl MockChain {
    pub fn new(tip: u64) -> Arc<Self> {
        let chain = Self {
            inner: Mutex::new(Inner {
                label: "a".into(),
                ..Inner::default()
            }),
        };
        chain.extend_to(tip);
        Arc::new(chain)
    }

    pub fn hash_for(label: &str, number: u64) -> B256 {
        let mut buf = label.as_bytes().to_vec();
        buf.extend_from_slice(&number.to_be_bytes());
        keccak256(buf)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn extend_to(&self, tip: u64) {
        let mut inner = self.lock();
        while inner.blocks.keys().next_back().map_or(true, |n| *n < tip) {
            inner.push_block();
        }
    }

    /// Replace every block from `height` up with empty blocks on fork `label`,
    /// keeping the same tip.
    pub fn fork_at(&self, height: u64, label: &str) {
        let tip = self.tip();
        {
            let mut inner = self.lock();
            inner.blocks.retain(|n, _| *n < height);
            inner.label = label.into();
        }
        self.extend_to(tip);
    }

    pub fn tip(&self) -> u64 {
        self.lock().blocks.keys().next_back().copied().unwrap_or(0)
    }

    pub fn block(&self, number: u64) -> BlockRef {
        self.lock().blocks[&number].header
    }

    pub fn add_log(&self, number: u64, data: LogData) {
        let mut inner = self.lock();
        let block = inner.blocks.get_mut(&number).expect("block exists");
        let log_index = block.logs.len() as u64;
        let mut tx = block.header.hash.to_vec();
        tx.extend_from_slice(&log_index.to_be_bytes());
        block.logs.push(RawLog {
            block_hash: block.header.hash,
            block_number: number,
            tx_hash: keccak256(tx),
            log_index,
            address: contract(),
            topics: data.topics().to_vec(),
            data: data.data,
            removed: false,
        });
    }

    pub fn deposit(&self, number: u64, account: Address, amount: u64) {
        self.add_log(
            number,
            StakeDeposited {
                account,
                amount: U256::from(amount),
            }
            .encode_log_data(),
        );
    }

    pub fn usage_proof(&self, number: u64, account: Address, interactions: u64) {
        self.add_log(
            number,
            UsageProofSubmitted {
                account,
                proofId: keccak256(number.to_be_bytes()),
                poiRoot: B256::repeat_byte(0x01),
                interactions,
            }
            .encode_log_data(),
        );
    }

    pub fn set_max_range(&self, blocks: u64) {
        self.lock().max_range = Some(blocks);
    }

    /// Fail the next `n` calls with `ProviderUnavailable`.
    pub fn fail_next(&self, n: u32) {
        self.lock().failures = n;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    /// Every `eth_getLogs` range requested so far, including refused ones.
    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.lock().requested.clone()
    }

    async fn enter(&self) -> Result<(), IndexerError> {
        let delay = {
            let mut inner = self.lock();
            if inner.failures > 0 {
                inner.failures -= 1;
                return Err(IndexerError::ProviderUnavailable("connection reset".into()));
            }
            inner.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn head_block(&self) -> Result<BlockRef, IndexerError> {
        self.enter().await?;
        let tip = self.tip();
        Ok(self.block(tip))
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<BlockRef>, IndexerError> {
        self.enter().await?;
        Ok(self.lock().blocks.get(&height).map(|b| b.header))
    }

    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        self.enter().await?;
        let mut inner = self.lock();
        inner.requested.push((from, to));
        if inner.max_range.is_some_and(|max| to - from + 1 > max) {
            return Err(IndexerError::RangeTooLarge { from, to });
        }
        Ok(inner
            .blocks
            .range(from..=to)
            .flat_map(|(_, b)| b.logs.iter())
            .filter(|l| filter.matches(l))
            .cloned()
            .collect())
    }
}
