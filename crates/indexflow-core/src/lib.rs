//! indexflow-core: foundation for the IndexFlow event-ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → Pipeline
//!                      ├── ChainClient      (head, headers, logs)
//!                      ├── ReorgDetector    (checkpoint hash vs. canonical chain)
//!                      ├── LogDecoder       (topic0 → DomainEvent)
//!                      ├── BatchSizer / RetryPolicy
//!                      └── IndexStore       (projection + checkpoint, one atomic unit)
//! ```
//!
//! This crate holds the types, traits and pure logic; the RPC client, decoder
//! and orchestrator live in `indexflow-evm`, the stores in `indexflow-storage`.

pub mod batch;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod index;
pub mod reorg;
pub mod retry;
pub mod state;
pub mod status;
pub mod types;

pub use batch::BatchSizer;
pub use chain::{ChainClient, EndpointStats};
pub use checkpoint::{Checkpoint, CheckpointStore, WriterClaim};
pub use config::{IndexerConfig, RetryConfig};
pub use error::{IndexerError, Severity};
pub use event::{DomainEvent, EventKind, Provenance};
pub use index::{
    AccountRecord, ApplyOutcome, Commit, IndexReader, IndexStore, Projection, RetractOutcome,
    RetractionRecord, Rollback, UsageProof,
};
pub use reorg::{BlockSource, ReorgDecision, ReorgDetector, ReorgEvent};
pub use retry::RetryPolicy;
pub use state::PipelineState;
pub use status::{ErrorReport, PipelineStatus};
pub use types::{BlockRef, LogFilter, LogId, RawLog};
