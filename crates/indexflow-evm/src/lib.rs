//! indexflow-evm: EVM JSON-RPC client, log decoder and ingestion pipeline.

pub mod builder;
pub mod client;
pub mod decoder;
pub mod pipeline;
pub mod pool;
pub mod rpc;

pub use builder::IndexerBuilder;
pub use client::RpcChainClient;
pub use decoder::{DecodeOutcome, LogDecoder};
pub use pipeline::{CycleOutcome, Pipeline, Provider};
pub use pool::RpcProviderPool;
pub use rpc::{EndpointFault, HttpTransport, RpcError};
