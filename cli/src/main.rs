//! indexflow: the index node binary.
//!
//! Usage:
//! ```bash
//! RPC_URL=http://localhost:8545 indexflow run --contract 0x5a5a...
//! RPC_URLS=https://a.example,https://b.example indexflow run
//! indexflow status --database-url ./indexflow.db
//! indexflow info
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use indexflow_core::{CheckpointStore, IndexReader, IndexStore, IndexerConfig, RetryConfig};
use indexflow_evm::{IndexerBuilder, LogDecoder, RpcProviderPool};
use indexflow_observability::{init_tracing, serve, IndexerMetrics, LogConfig};
use indexflow_storage::SqliteStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "Reorg-safe event ingestion for staking contracts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the ingestion pipeline and the metrics server.
    Run(RunArgs),
    /// Print the persisted checkpoint and writer claim as JSON.
    Status(StoreArgs),
    /// Print the built-in defaults.
    Info,
}

#[derive(Debug, Clone, Args)]
struct StoreArgs {
    /// SQLite file path or `sqlite:` URL.
    #[arg(long, env = "DATABASE_URL", default_value = "indexflow.db")]
    database_url: String,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[arg(long, env = "RPC_URL", required_unless_present = "rpc_urls")]
    rpc_url: Option<String>,
    /// Failover endpoints, comma separated. Tried before `RPC_URL`.
    #[arg(long, env = "RPC_URLS", value_delimiter = ',')]
    rpc_urls: Vec<String>,
    /// How long a rate-limited endpoint is skipped.
    #[arg(long, env = "RPC_COOLDOWN_MS", default_value_t = 60_000)]
    rpc_cooldown_ms: u64,
    #[arg(long, env = "CHAIN_ID", default_value_t = 1)]
    chain_id: u64,
    /// Writer claim owner; one live writer per store.
    #[arg(long, env = "INDEXER_ID", default_value = "indexflow")]
    id: String,
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long, env = "START_BLOCK", default_value_t = 0)]
    start_block: u64,
    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = 2000)]
    max_batch_size: u64,
    #[arg(long, env = "MAX_REORG_DEPTH", default_value_t = 64)]
    max_reorg_depth: u64,
    #[arg(long, env = "INDEX_POLL_INTERVAL_MS", default_value_t = 4000)]
    poll_interval_ms: u64,
    #[arg(long, env = "RPC_TIMEOUT_MS", default_value_t = 30_000)]
    rpc_timeout_ms: u64,
    #[arg(long, env = "RPC_MAX_RETRIES", default_value_t = 5)]
    rpc_max_retries: u32,
    /// Contracts to watch, comma separated. Empty watches every address.
    #[arg(long = "contract", env = "CONTRACT_ADDRESSES", value_delimiter = ',')]
    contracts: Vec<Address>,
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9464")]
    metrics_addr: SocketAddr,
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
    /// Emit JSON logs.
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl RunArgs {
    fn endpoints(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .rpc_urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if let Some(url) = &self.rpc_url {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }

    fn builder(&self) -> IndexerBuilder {
        let retry = RetryConfig {
            max_retries: self.rpc_max_retries,
            ..RetryConfig::default()
        };
        self.contracts.iter().fold(
            IndexerBuilder::new()
                .id(self.id.clone())
                .chain_id(self.chain_id)
                .start_height(self.start_block)
                .max_batch_size(self.max_batch_size)
                .max_reorg_depth(self.max_reorg_depth)
                .poll_interval_ms(self.poll_interval_ms)
                .request_timeout_ms(self.rpc_timeout_ms)
                .retry(retry),
            |b, addr| b.contract(*addr),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Run(args) => cmd_run(args).await,
        Command::Status(args) => cmd_status(args).await,
        Command::Info => cmd_info(),
    }
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(&LogConfig::new(&args.log_level, args.log_json));

    let store = Arc::new(
        SqliteStore::open(&args.store.database_url)
            .await
            .with_context(|| format!("opening store {}", args.store.database_url))?,
    );
    let endpoints = args.endpoints();
    tracing::info!(endpoints = endpoints.len(), "Connecting to RPC");
    let client = RpcProviderPool::new(endpoints, Duration::from_millis(args.rpc_timeout_ms))?
        .with_cooldown(Duration::from_millis(args.rpc_cooldown_ms));
    let pipeline = args.builder().build(client, store)?;

    let shutdown = pipeline.shutdown_token();
    let metrics = Arc::new(IndexerMetrics::new()?);
    let server = tokio::spawn(serve(
        args.metrics_addr,
        metrics,
        pipeline.status(),
        shutdown.clone(),
    ));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
            signal.cancel();
        }
    });

    let result = pipeline.run().await;
    if let Err(e) = &result {
        // Keep /health and /metrics up so the halt is observable.
        tracing::error!(error = %e, "Pipeline halted; serving metrics until shutdown");
        shutdown.cancelled().await;
    }
    shutdown.cancel();
    server.await?.context("metrics server")?;
    result?;
    Ok(())
}

async fn cmd_status(args: StoreArgs) -> anyhow::Result<()> {
    let store = SqliteStore::open(&args.database_url)
        .await
        .with_context(|| format!("opening store {}", args.database_url))?;

    let checkpoint = store.load().await?;
    let claim = store.current_claim().await?;
    let retractions = store.retractions().await?;
    let total_staked = store.total_staked().await?;

    let status = json!({
        "checkpoint": checkpoint,
        "claim": claim,
        "retractions": retractions.len(),
        "total_staked": total_staked.to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn cmd_info() -> anyhow::Result<()> {
    let decoder = LogDecoder::staking();
    let info = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "defaults": IndexerConfig::default(),
        "events": decoder.topic0s(),
        "storage": ["memory", "sqlite"],
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_from_flags() {
        let cli = Cli::try_parse_from([
            "indexflow",
            "run",
            "--rpc-url",
            "http://localhost:8545",
            "--contract",
            "0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a,0x0000000000000000000000000000000000000001",
            "--max-reorg-depth",
            "12",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.contracts.len(), 2);
        assert_eq!(args.contracts[0], Address::repeat_byte(0x5a));

        let cfg = args.builder().build_config();
        assert_eq!(cfg.max_reorg_depth, 12);
        assert_eq!(cfg.filter.addresses, args.contracts);
        assert_eq!(cfg.retry.max_retries, 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn run_requires_rpc_url() {
        // Either may be set in the environment running the tests.
        if std::env::var_os("RPC_URL").is_none() && std::env::var_os("RPC_URLS").is_none() {
            assert!(Cli::try_parse_from(["indexflow", "run"]).is_err());
        }
    }

    #[test]
    fn rpc_urls_merge_with_rpc_url() {
        let cli = Cli::try_parse_from([
            "indexflow",
            "run",
            "--rpc-urls",
            "https://a.example, https://b.example",
            "--rpc-url",
            "https://b.example",
            "--rpc-cooldown-ms",
            "5000",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.endpoints(), ["https://a.example", "https://b.example"]);
        assert_eq!(args.rpc_cooldown_ms, 5000);
    }

    #[test]
    fn rpc_urls_alone_is_enough() {
        if std::env::var_os("RPC_URL").is_some() {
            return;
        }
        let cli =
            Cli::try_parse_from(["indexflow", "run", "--rpc-urls", "https://a.example"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.endpoints(), ["https://a.example"]);
        assert_eq!(args.rpc_cooldown_ms, 60_000);
    }

    #[test]
    fn status_and_info_parse() {
        let cli = Cli::try_parse_from(["indexflow", "status", "--database-url", "x.db"]).unwrap();
        assert!(matches!(cli.command, Command::Status(StoreArgs { ref database_url }) if database_url == "x.db"));
        let cli = Cli::try_parse_from(["indexflow", "info"]).unwrap();
        assert!(matches!(cli.command, Command::Info));
    }

    #[test]
    fn rejects_bad_contract_address() {
        assert!(Cli::try_parse_from([
            "indexflow",
            "run",
            "--rpc-url",
            "http://localhost:8545",
            "--contract",
            "not-an-address",
        ])
        .is_err());
    }
}
