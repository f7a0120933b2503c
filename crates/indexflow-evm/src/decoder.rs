//! Log decoder: maps raw logs to typed domain events by topic0.
//!
//! Events are registered against their ABI signature; the pipeline only
//! ever calls [`LogDecoder::decode`], so new events can be modelled without
//! touching its control flow. A log whose topic0 is unknown is
//! [`DecodeOutcome::Unrecognized`]; a log whose topic0 is known but whose
//! topics or data do not match the ABI is a fatal [`IndexerError::CorruptLog`].

use std::collections::HashMap;

use alloy_primitives::B256;
use alloy_sol_types::{sol, SolEvent, TopicList};

use indexflow_core::{DomainEvent, EventKind, IndexerError, Provenance, RawLog};

sol! {
    /// Emitted by the staking contract when stake is added.
    event StakeDeposited(address indexed account, uint256 amount);
    event StakeWithdrawn(address indexed account, uint256 amount);
    /// Governance slashing.
    event StakeSlashed(address indexed account, uint256 amount, address recipient);
    event RewardsClaimed(address indexed account, uint256 amount);
    /// Emitted by the usage registry for each accepted proof of usage.
    event UsageProofSubmitted(
        address indexed account,
        bytes32 indexed proofId,
        bytes32 poiRoot,
        uint64 interactions
    );
}

/// Result of decoding one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Event(DomainEvent),
    /// topic0 not registered (or no topics at all).
    Unrecognized,
}

type DecodeFn = Box<dyn Fn(&RawLog) -> Result<EventKind, String> + Send + Sync>;

struct Registration {
    name: &'static str,
    decode: DecodeFn,
}

/// Registry of known events keyed by signature hash.
pub struct LogDecoder {
    registry: HashMap<B256, Registration>,
}

impl Default for LogDecoder {
    fn default() -> Self {
        Self::staking()
    }
}

impl LogDecoder {
    /// A decoder with no events registered.
    pub fn empty() -> Self {
        Self {
            registry: HashMap::new(),
        }
    }

    /// The staking and usage-proof event catalog.
    pub fn staking() -> Self {
        let mut d = Self::empty();
        d.register(|e: StakeDeposited| EventKind::StakeDeposited {
            account: e.account,
            amount: e.amount,
        })
        .register(|e: StakeWithdrawn| EventKind::StakeWithdrawn {
            account: e.account,
            amount: e.amount,
        })
        .register(|e: StakeSlashed| EventKind::StakeSlashed {
            account: e.account,
            amount: e.amount,
            recipient: e.recipient,
        })
        .register(|e: RewardsClaimed| EventKind::RewardsClaimed {
            account: e.account,
            amount: e.amount,
        })
        .register(|e: UsageProofSubmitted| EventKind::UsageProofSubmitted {
            account: e.account,
            proof_id: e.proofId,
            poi_root: e.poiRoot,
            interactions: e.interactions,
        });
        d
    }

    /// Register `E`, mapping its decoded form into an [`EventKind`].
    pub fn register<E, F>(&mut self, map: F) -> &mut Self
    where
        E: SolEvent + 'static,
        F: Fn(E) -> EventKind + Send + Sync + 'static,
    {
        let expected_topics = <E::TopicList as TopicList>::COUNT;
        let decode = move |log: &RawLog| -> Result<EventKind, String> {
            if log.topics.len() != expected_topics {
                return Err(format!(
                    "expected {expected_topics} topics, got {}",
                    log.topics.len()
                ));
            }
            let event = E::decode_raw_log(log.topics.iter().copied(), &log.data, true)
                .map_err(|e| e.to_string())?;
            Ok(map(event))
        };
        let name = E::SIGNATURE.split('(').next().unwrap_or(E::SIGNATURE);
        self.registry.insert(
            E::SIGNATURE_HASH,
            Registration {
                name,
                decode: Box::new(decode),
            },
        );
        self
    }

    /// Signature hashes of every registered event.
    pub fn topic0s(&self) -> Vec<B256> {
        let mut v: Vec<_> = self.registry.keys().copied().collect();
        v.sort();
        v
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Decode one log. Pure: the same log always yields the same outcome.
    pub fn decode(&self, log: &RawLog) -> Result<DecodeOutcome, IndexerError> {
        let Some(reg) = log.topic0().and_then(|t| self.registry.get(&t)) else {
            return Ok(DecodeOutcome::Unrecognized);
        };
        match (reg.decode)(log) {
            Ok(kind) => Ok(DecodeOutcome::Event(DomainEvent {
                provenance: Provenance::of(log),
                address: log.address,
                kind,
            })),
            Err(reason) => Err(IndexerError::CorruptLog {
                event: reg.name,
                height: log.block_number,
                block_hash: log.block_hash,
                tx_hash: log.tx_hash,
                log_index: log.log_index,
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, LogData, U256};

    fn raw(data: LogData) -> RawLog {
        RawLog {
            block_hash: B256::repeat_byte(0xbb),
            block_number: 101,
            tx_hash: B256::repeat_byte(0xcc),
            log_index: 4,
            address: Address::repeat_byte(0x5a),
            topics: data.topics().to_vec(),
            data: data.data,
            removed: false,
        }
    }

    #[test]
    fn decodes_stake_deposited() {
        let account = Address::repeat_byte(0xa1);
        let log = raw(StakeDeposited {
            account,
            amount: U256::from(1_000u64),
        }
        .encode_log_data());

        let DecodeOutcome::Event(ev) = LogDecoder::staking().decode(&log).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(
            ev.kind,
            EventKind::StakeDeposited {
                account,
                amount: U256::from(1_000u64)
            }
        );
        assert_eq!(ev.provenance.block_number, 101);
        assert_eq!(ev.provenance.log_index, 4);
    }

    #[test]
    fn decodes_usage_proof_with_indexed_bytes32() {
        let log = raw(UsageProofSubmitted {
            account: Address::repeat_byte(0xa1),
            proofId: B256::repeat_byte(0x01),
            poiRoot: B256::repeat_byte(0x02),
            interactions: 42,
        }
        .encode_log_data());
        let DecodeOutcome::Event(ev) = LogDecoder::staking().decode(&log).unwrap() else {
            panic!("expected event");
        };
        match ev.kind {
            EventKind::UsageProofSubmitted {
                proof_id,
                interactions,
                ..
            } => {
                assert_eq!(proof_id, B256::repeat_byte(0x01));
                assert_eq!(interactions, 42);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_topic_is_unrecognized() {
        let mut log = raw(StakeDeposited {
            account: Address::ZERO,
            amount: U256::ZERO,
        }
        .encode_log_data());
        log.topics[0] = B256::repeat_byte(0xee);
        assert_eq!(
            LogDecoder::staking().decode(&log).unwrap(),
            DecodeOutcome::Unrecognized
        );

        log.topics.clear();
        assert_eq!(
            LogDecoder::staking().decode(&log).unwrap(),
            DecodeOutcome::Unrecognized
        );
    }

    #[test]
    fn truncated_data_is_corrupt() {
        let mut log = raw(StakeWithdrawn {
            account: Address::repeat_byte(1),
            amount: U256::from(5u64),
        }
        .encode_log_data());
        log.data = Bytes::from(vec![0u8; 7]);

        let err = LogDecoder::staking().decode(&log).unwrap_err();
        assert!(err.is_fatal());
        match err {
            IndexerError::CorruptLog { event, height, .. } => {
                assert_eq!(event, "StakeWithdrawn");
                assert_eq!(height, 101);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wrong_topic_count_is_corrupt() {
        let mut log = raw(RewardsClaimed {
            account: Address::repeat_byte(1),
            amount: U256::from(5u64),
        }
        .encode_log_data());
        log.topics.push(B256::ZERO);
        assert!(matches!(
            LogDecoder::staking().decode(&log),
            Err(IndexerError::CorruptLog { .. })
        ));
    }

    #[test]
    fn catalog_has_distinct_signatures() {
        let d = LogDecoder::staking();
        assert_eq!(d.len(), 5);
        assert!(d.topic0s().contains(&StakeSlashed::SIGNATURE_HASH));
    }
}
