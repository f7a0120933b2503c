//! # indexflow-observability
//!
//! Pull-based metrics and structured logging for the IndexFlow pipeline.
//!
//! ## Metrics
//! Every metric is rendered from the latest [`PipelineStatus`] snapshot the
//! pipeline publishes, so a scrape never waits on ingestion. Names carry the
//! `indexflow_` prefix:
//! - `indexflow_checkpoint_height`, `indexflow_chain_head_height`, `indexflow_blocks_behind`
//! - `indexflow_events_applied_total`, `indexflow_events_skipped_total`, `indexflow_events_retracted_total`
//! - `indexflow_blocks_indexed_total`, `indexflow_reorgs_total`, `indexflow_provider_retries_total`
//! - `indexflow_batch_size`, `indexflow_ingestion_blocks_per_second`
//! - `indexflow_pipeline_state{state}`, `indexflow_halted`
//! - `indexflow_errors_total{kind}`, `indexflow_last_error_timestamp_seconds{kind}`
//! - `indexflow_rpc_provider_rate_limit_total{url}`, `indexflow_rpc_provider_available{url}`
//!
//! ## Structured logging
//! JSON or human-readable logs via `tracing-subscriber`, with per-component levels.
//!
//! [`PipelineStatus`]: indexflow_core::PipelineStatus

pub mod metrics;
pub mod server;
pub mod tracing_setup;

pub use metrics::IndexerMetrics;
pub use server::{router, serve};
pub use tracing_setup::{init_tracing, LogConfig};
