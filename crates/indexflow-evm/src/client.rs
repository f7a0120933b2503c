//! [`ChainClient`] over an HTTP JSON-RPC endpoint.
//!
//! Uses `eth_getBlockByNumber` for headers and `eth_getLogs` for event logs.

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U64};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use indexflow_core::{BlockRef, ChainClient, IndexerError, LogFilter, RawLog};

use crate::rpc::{HttpTransport, RpcError};

/// Block header fields we read from `eth_getBlockByNumber`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlock {
    number: U64,
    hash: B256,
    parent_hash: B256,
}

impl From<WireBlock> for BlockRef {
    fn from(b: WireBlock) -> Self {
        BlockRef::new(b.number.to::<u64>(), b.hash, b.parent_hash)
    }
}

/// A log as returned by `eth_getLogs`. Pending logs carry nulls.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<U64>,
    block_hash: Option<B256>,
    transaction_hash: Option<B256>,
    log_index: Option<U64>,
    #[serde(default)]
    removed: bool,
}

impl WireLog {
    fn into_raw(self) -> Result<RawLog, RpcError> {
        let (Some(number), Some(block_hash), Some(tx_hash), Some(index)) = (
            self.block_number,
            self.block_hash,
            self.transaction_hash,
            self.log_index,
        ) else {
            return Err(RpcError::InvalidResponse(
                "provider returned a log without block position".into(),
            ));
        };
        Ok(RawLog {
            block_hash,
            block_number: number.to::<u64>(),
            tx_hash,
            log_index: index.to::<u64>(),
            address: self.address,
            topics: self.topics,
            data: self.data,
            removed: self.removed,
        })
    }
}

/// Format a block number as a JSON-RPC quantity.
pub fn quantity(n: u64) -> String {
    format!("{n:#x}")
}

/// Build the `eth_getLogs` filter object.
pub fn logs_filter(from: u64, to: u64, filter: &LogFilter) -> Value {
    let mut obj = Map::new();
    obj.insert("fromBlock".into(), json!(quantity(from)));
    obj.insert("toBlock".into(), json!(quantity(to)));
    if !filter.addresses.is_empty() {
        obj.insert("address".into(), json!(filter.addresses));
    }
    if !filter.topic0s.is_empty() {
        obj.insert("topics".into(), json!([filter.topic0s]));
    }
    Value::Object(obj)
}

/// HTTP JSON-RPC chain client. Performs no retries of its own.
pub struct RpcChainClient {
    transport: HttpTransport,
}

impl RpcChainClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IndexerError> {
        let transport = HttpTransport::new(url, timeout)
            .map_err(|e| IndexerError::Config(format!("cannot build RPC client: {e}")))?;
        Ok(Self { transport })
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    async fn block(&self, tag: String) -> Result<Option<BlockRef>, RpcError> {
        let block: Option<WireBlock> = self
            .transport
            .request("eth_getBlockByNumber", vec![json!(tag), json!(false)])
            .await?;
        Ok(block.map(BlockRef::from))
    }

    pub(crate) async fn fetch_head(&self) -> Result<BlockRef, RpcError> {
        self.block("latest".into())
            .await?
            .ok_or_else(|| RpcError::InvalidResponse("provider returned no latest block".into()))
    }

    pub(crate) async fn fetch_block(&self, height: u64) -> Result<Option<BlockRef>, RpcError> {
        self.block(quantity(height)).await
    }

    pub(crate) async fn fetch_logs(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, RpcError> {
        let logs: Vec<WireLog> = self
            .transport
            .request("eth_getLogs", vec![logs_filter(from, to, filter)])
            .await?;

        tracing::debug!(url = self.url(), from, to, count = logs.len(), "eth_getLogs");
        let mut out = logs
            .into_iter()
            .map(WireLog::into_raw)
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by_key(RawLog::position);
        Ok(out)
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn head_block(&self) -> Result<BlockRef, IndexerError> {
        self.fetch_head().await.map_err(|e| e.classify(None))
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<BlockRef>, IndexerError> {
        self.fetch_block(height).await.map_err(|e| e.classify(None))
    }

    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        self.fetch_logs(from, to, filter)
            .await
            .map_err(|e| e.classify(Some((from, to))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_is_hex() {
        assert_eq!(quantity(0), "0x0");
        assert_eq!(quantity(255), "0xff");
    }

    #[test]
    fn filter_omits_empty_fields() {
        let v = logs_filter(16, 31, &LogFilter::default());
        assert_eq!(v["fromBlock"], "0x10");
        assert_eq!(v["toBlock"], "0x1f");
        assert!(v.get("address").is_none());
        assert!(v.get("topics").is_none());

        let f = LogFilter::address(Address::repeat_byte(0x11)).topic0(B256::repeat_byte(0x22));
        let v = logs_filter(1, 1, &f);
        assert_eq!(v["address"].as_array().unwrap().len(), 1);
        assert_eq!(v["topics"][0].as_array().unwrap().len(), 1);
    }

    #[test]
    fn wire_log_parses_provider_json() {
        let json = r#"{
            "address": "0x1111111111111111111111111111111111111111",
            "topics": ["0x2222222222222222222222222222222222222222222222222222222222222222"],
            "data": "0x01",
            "blockNumber": "0x10",
            "blockHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
            "transactionHash": "0x4444444444444444444444444444444444444444444444444444444444444444",
            "transactionIndex": "0x0",
            "logIndex": "0x2",
            "removed": false
        }"#;
        let log: WireLog = serde_json::from_str(json).unwrap();
        let raw = log.into_raw().unwrap();
        assert_eq!(raw.block_number, 16);
        assert_eq!(raw.log_index, 2);
        assert_eq!(raw.topic0(), Some(B256::repeat_byte(0x22)));
        assert_eq!(raw.data.as_ref(), &[1u8]);
    }

    #[test]
    fn pending_log_is_rejected() {
        let json = r#"{
            "address": "0x1111111111111111111111111111111111111111",
            "topics": [],
            "data": "0x",
            "blockNumber": null,
            "blockHash": null,
            "transactionHash": null,
            "logIndex": null
        }"#;
        let log: WireLog = serde_json::from_str(json).unwrap();
        assert!(log.into_raw().is_err());
    }
}
