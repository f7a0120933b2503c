//! The ingestion pipeline: one sequential cycle per batch.
//!
//! ```text
//! Idle → DeterminingRange → CheckingReorg (→ RollingBack)? → FetchingLogs
//!      → Decoding → Applying → Checkpointing → Idle
//! ```
//!
//! `Halted` is terminal and only entered on fatal errors. Every chain call
//! goes through [`Provider`], which owns the timeout and retry policy; the
//! store write in `Applying` is the only point where state changes, and it
//! commits the events together with the new checkpoint.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::B256;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use indexflow_core::{
    BatchSizer, BlockRef, BlockSource, ChainClient, Checkpoint, Commit, DomainEvent, IndexStore,
    IndexerConfig, IndexerError, PipelineState, PipelineStatus, RawLog, ReorgDecision,
    ReorgDetector, ReorgEvent, RetryPolicy, Rollback, WriterClaim,
};

use crate::decoder::{DecodeOutcome, LogDecoder};

/// Concurrent header requests per batch.
const HEADER_CONCURRENCY: usize = 8;

// ─── Provider ─────────────────────────────────────────────────────────────────

/// Wraps a [`ChainClient`] with per-call timeouts, retries and cancellation.
pub struct Provider<C> {
    client: C,
    timeout: Duration,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    retries: AtomicU64,
    timeouts: AtomicU64,
}

impl<C: ChainClient> Provider<C> {
    pub fn new(client: C, timeout: Duration, retry: RetryPolicy, shutdown: CancellationToken) -> Self {
        Self {
            client,
            timeout,
            retry,
            shutdown,
            retries: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Total retried calls so far.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Total calls that hit the timeout.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Run `f` under the timeout, retrying `ProviderUnavailable` with backoff.
    ///
    /// Other errors are returned immediately. Cancellation aborts both the
    /// in-flight call and any backoff sleep.
    pub async fn call<'a, T, F, Fut>(&'a self, op: &'static str, f: F) -> Result<T, IndexerError>
    where
        F: Fn(&'a C) -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(IndexerError::Aborted(format!("{op} cancelled")));
                }
                r = tokio::time::timeout(self.timeout, f(&self.client)) => match r {
                    Ok(r) => r,
                    Err(_) => {
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                        Err(IndexerError::ProviderUnavailable(format!(
                            "{op} timed out after {}ms",
                            self.timeout.as_millis()
                        )))
                    }
                },
            };

            let err = match result {
                Err(e) if e.is_retryable() => e,
                other => return other,
            };

            attempt += 1;
            let Some(delay) = self.retry.next_delay(attempt) else {
                tracing::error!(op, attempts = attempt, error = %err, "Provider retries exhausted");
                return Err(IndexerError::RetriesExhausted {
                    op,
                    attempts: attempt,
                    last: err.to_string(),
                });
            };
            self.retries.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                op,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Provider call failed, retrying"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(IndexerError::Aborted(format!("{op} cancelled")));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// The reorg detector's view: canonical blocks from the provider, local
/// hashes from the store.
struct ChainView<'a, C, S> {
    provider: &'a Provider<C>,
    store: &'a S,
}

#[async_trait]
impl<C: ChainClient, S: IndexStore> BlockSource for ChainView<'_, C, S> {
    async fn canonical_block(&self, height: u64) -> Result<Option<BlockRef>, IndexerError> {
        self.provider
            .call("eth_getBlockByNumber", |c| c.block_by_height(height))
            .await
    }

    async fn local_hash(&self, height: u64) -> Result<Option<B256>, IndexerError> {
        self.store.local_hash(height).await
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Indexed `from..=to` and moved the checkpoint to `to`.
    Advanced {
        from: u64,
        to: u64,
        applied: u64,
        skipped: u64,
    },
    /// Retracted events above the common ancestor.
    RolledBack(ReorgEvent),
    /// Nothing new below the chain head.
    UpToDate { head: u64 },
}

/// Logs and headers fetched for one batch.
struct Fetched {
    logs: Vec<RawLog>,
    headers: Vec<BlockRef>,
    bisected: bool,
}

/// The single-writer ingestion loop.
pub struct Pipeline<C, S> {
    config: IndexerConfig,
    provider: Provider<C>,
    store: Arc<S>,
    decoder: LogDecoder,
    detector: ReorgDetector,
    sizer: BatchSizer,
    retry: RetryPolicy,
    claim: Option<WriterClaim>,
    status: watch::Sender<PipelineStatus>,
    shutdown: CancellationToken,
    halted: Option<String>,
}

impl<C: ChainClient, S: IndexStore> Pipeline<C, S> {
    pub fn new(config: IndexerConfig, client: C, store: Arc<S>) -> Result<Self, IndexerError> {
        config.validate()?;
        let shutdown = CancellationToken::new();
        let retry = RetryPolicy::new(config.retry.clone());
        let sizer = BatchSizer::new(config.max_batch_size, config.batch_growth_after);
        let (status, _) = watch::channel(PipelineStatus::new(sizer.current()));
        Ok(Self {
            provider: Provider::new(
                client,
                config.request_timeout(),
                retry.clone(),
                shutdown.clone(),
            ),
            detector: ReorgDetector::new(config.max_reorg_depth, config.start_height),
            decoder: LogDecoder::staking(),
            sizer,
            retry,
            store,
            claim: None,
            status,
            shutdown,
            halted: None,
            config,
        })
    }

    /// Replace the event catalog.
    pub fn with_decoder(mut self, decoder: LogDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Use an externally owned shutdown token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.provider.shutdown = token.clone();
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Subscribe to status snapshots.
    pub fn status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn batch_size(&self) -> u64 {
        self.sizer.current()
    }

    /// Run one cycle. Fatal errors move the pipeline to `Halted`, after which
    /// every call fails without touching the chain or the store.
    pub async fn step(&mut self) -> Result<CycleOutcome, IndexerError> {
        if let Some(reason) = &self.halted {
            return Err(IndexerError::Aborted(format!("pipeline halted: {reason}")));
        }
        let result = self.cycle().await;
        let endpoints = self.provider.client().endpoint_stats();
        if !endpoints.is_empty() {
            self.publish(|s| s.endpoints = endpoints);
        }
        if let Err(e) = &result {
            self.fail(e);
        }
        self.enter(if self.halted.is_some() {
            PipelineState::Halted
        } else {
            PipelineState::Idle
        });
        result
    }

    /// Loop until cancelled or halted, then release the writer claim.
    pub async fn run(mut self) -> Result<(), IndexerError> {
        tracing::info!(
            id = %self.config.id,
            chain_id = self.config.chain_id,
            start = self.config.start_height,
            max_batch = self.config.max_batch_size,
            max_reorg_depth = self.config.max_reorg_depth,
            "Starting ingestion pipeline"
        );
        let result = self.run_loop().await;
        self.release().await;
        match &result {
            Ok(()) => tracing::info!(id = %self.config.id, "Ingestion pipeline stopped"),
            Err(e) => tracing::error!(id = %self.config.id, error = %e, "Ingestion pipeline halted"),
        }
        result
    }

    /// Give up the writer claim, if held.
    pub async fn release(&mut self) {
        if let Some(claim) = self.claim.take() {
            match self.store.release(&claim).await {
                Ok(()) => tracing::info!(%claim, "Writer claim released"),
                Err(e) => tracing::warn!(%claim, error = %e, "Failed to release writer claim"),
            }
        }
    }

    async fn run_loop(&mut self) -> Result<(), IndexerError> {
        let mut failures = 0u32;
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match self.step().await {
                Ok(CycleOutcome::UpToDate { .. }) => {
                    failures = 0;
                    if !self.pause(self.config.poll_interval()).await {
                        return Ok(());
                    }
                }
                Ok(_) => failures = 0,
                Err(IndexerError::Aborted(_)) if self.halted.is_none() => return Ok(()),
                Err(e) if e.is_fatal() || self.halted.is_some() => return Err(e),
                Err(e) => {
                    failures += 1;
                    let Some(delay) = self.retry.next_delay(failures) else {
                        let err = IndexerError::RetriesExhausted {
                            op: "ingestion cycle",
                            attempts: failures,
                            last: e.to_string(),
                        };
                        self.fail(&err);
                        self.enter(PipelineState::Halted);
                        return Err(err);
                    };
                    if !self.pause(delay).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, IndexerError> {
        let claim = self.ensure_claim().await?;

        self.enter(PipelineState::DeterminingRange);
        let checkpoint = self.store.load().await?;
        self.publish(|s| {
            s.checkpoint_height = checkpoint.as_ref().map(|c| c.height);
            s.checkpoint_hash = checkpoint.as_ref().map(|c| c.block_hash);
        });
        let head = self
            .provider
            .call("eth_blockNumber", |c| c.head_block())
            .await?;
        self.publish(|s| s.chain_head = Some(head.number));

        if let Some(cp) = &checkpoint {
            self.enter(PipelineState::CheckingReorg);
            let view = ChainView {
                provider: &self.provider,
                store: self.store.as_ref(),
            };
            if let ReorgDecision::Reorg(event) = self.detector.check(cp, &view).await? {
                return self.roll_back(&claim, cp.clone(), event).await;
            }
        }

        let next = checkpoint
            .as_ref()
            .map_or(self.config.start_height, |c| c.height + 1);
        if head.number < next {
            tracing::debug!(head = head.number, next, "Up to date");
            return Ok(CycleOutcome::UpToDate { head: head.number });
        }
        let target = head
            .number
            .min(next.saturating_add(self.sizer.current() - 1));

        self.enter(PipelineState::FetchingLogs);
        let started = Instant::now();
        let timeouts_before = self.provider.timeouts();
        let window_from = next
            .max(head.number.saturating_sub(self.config.max_reorg_depth))
            .min(target);
        let (fetched_logs, headers) = futures::try_join!(
            self.fetch_logs(next, target),
            self.fetch_headers(window_from, target),
        )?;
        let fetched = Fetched {
            logs: fetched_logs.0,
            bisected: fetched_logs.1,
            headers,
        };
        verify_view(checkpoint.as_ref(), next, target, &fetched)?;

        self.enter(PipelineState::Decoding);
        let (events, skipped) = self.decode(fetched.logs)?;

        self.enter(PipelineState::Applying);
        let Some(last) = fetched.headers.last().copied() else {
            return Err(IndexerError::InconsistentView {
                height: target,
                reason: "no header fetched for batch target".into(),
            });
        };
        let next_cp = Checkpoint::at(&last);
        let commit = Commit {
            expected: checkpoint,
            next: next_cp.clone(),
            blocks: fetched.headers,
            retain_from: target.saturating_sub(self.config.max_reorg_depth + 1),
            events,
        };
        let outcome = self.store.apply(&claim, commit).await?;

        self.enter(PipelineState::Checkpointing);
        let shrink = fetched.bisected || self.provider.timeouts() > timeouts_before;
        if shrink {
            self.sizer.shrink();
        } else {
            self.sizer.record_success();
        }
        let blocks = target - next + 1;
        let secs = started.elapsed().as_secs_f64();
        let batch_size = self.sizer.current();
        let retries = self.provider.retries();
        self.publish(|s| {
            s.checkpoint_height = Some(next_cp.height);
            s.checkpoint_hash = Some(next_cp.block_hash);
            s.events_applied += outcome.applied;
            s.events_skipped += skipped;
            s.blocks_indexed += blocks;
            s.batch_size = batch_size;
            s.provider_retries = retries;
            if secs > 0.0 {
                s.blocks_per_second = blocks as f64 / secs;
            }
        });

        tracing::info!(
            from = next,
            to = target,
            hash = %next_cp.block_hash,
            applied = outcome.applied,
            duplicates = outcome.duplicates,
            skipped,
            behind = head.number - target,
            "Batch indexed"
        );

        Ok(CycleOutcome::Advanced {
            from: next,
            to: target,
            applied: outcome.applied,
            skipped,
        })
    }

    async fn ensure_claim(&mut self) -> Result<WriterClaim, IndexerError> {
        if let Some(claim) = &self.claim {
            return Ok(claim.clone());
        }
        let claim = self.store.claim(&self.config.id).await?;
        tracing::info!(%claim, "Writer claim acquired");
        self.claim = Some(claim.clone());
        Ok(claim)
    }

    async fn roll_back(
        &self,
        claim: &WriterClaim,
        checkpoint: Checkpoint,
        event: ReorgEvent,
    ) -> Result<CycleOutcome, IndexerError> {
        self.enter(PipelineState::RollingBack);
        let target = event.rollback_target();
        let outcome = self
            .store
            .retract(
                claim,
                Rollback {
                    expected: checkpoint,
                    to: target.clone(),
                },
            )
            .await?;

        tracing::warn!(
            detected_at = event.detected_at,
            depth = event.depth,
            ancestor = ?event.common_ancestor.map(|b| b.number),
            retracted = outcome.retracted,
            "Rolled back reorged blocks"
        );
        self.publish(|s| {
            s.reorgs += 1;
            s.events_retracted += outcome.retracted;
            s.checkpoint_height = target.as_ref().map(|c| c.height);
            s.checkpoint_hash = target.as_ref().map(|c| c.block_hash);
        });
        Ok(CycleOutcome::RolledBack(event))
    }

    /// Fetch logs for `from..=to`, bisecting ranges the provider refuses.
    ///
    /// Returns the logs in range order and whether any bisection happened.
    async fn fetch_logs(&self, from: u64, to: u64) -> Result<(Vec<RawLog>, bool), IndexerError> {
        let filter = &self.config.filter;
        let mut pending = VecDeque::from([(from, to)]);
        let mut logs = Vec::new();
        let mut bisected = false;

        while let Some((lo, hi)) = pending.pop_front() {
            match self
                .provider
                .call("eth_getLogs", |c| c.logs_in_range(lo, hi, filter))
                .await
            {
                Ok(batch) => logs.extend(batch),
                Err(IndexerError::RangeTooLarge { .. }) if lo < hi => {
                    let mid = lo + (hi - lo) / 2;
                    tracing::debug!(from = lo, to = hi, mid, "Log range too large, bisecting");
                    pending.push_front((mid + 1, hi));
                    pending.push_front((lo, mid));
                    bisected = true;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((logs, bisected))
    }

    async fn fetch_headers(&self, from: u64, to: u64) -> Result<Vec<BlockRef>, IndexerError> {
        let provider = &self.provider;
        stream::iter(from..=to)
            .map(|height| async move {
                provider
                    .call("eth_getBlockByNumber", |c| c.block_by_height(height))
                    .await?
                    .ok_or_else(|| IndexerError::InconsistentView {
                        height,
                        reason: "block not found".into(),
                    })
            })
            .buffered(HEADER_CONCURRENCY)
            .try_collect()
            .await
    }

    /// Decode in `(height, log_index)` order. Returns events and the number
    /// of unrecognized logs.
    fn decode(&self, mut logs: Vec<RawLog>) -> Result<(Vec<DomainEvent>, u64), IndexerError> {
        logs.retain(|l| !l.removed);
        logs.sort_by_key(RawLog::position);
        logs.dedup_by_key(|l| l.id());

        let mut events = Vec::with_capacity(logs.len());
        let mut skipped = 0u64;
        for log in &logs {
            match self.decoder.decode(log)? {
                DecodeOutcome::Event(event) => events.push(event),
                DecodeOutcome::Unrecognized => {
                    tracing::debug!(
                        height = log.block_number,
                        log_index = log.log_index,
                        topic0 = ?log.topic0(),
                        "Skipping unrecognized log"
                    );
                    skipped += 1;
                }
            }
        }
        Ok((events, skipped))
    }

    fn fail(&mut self, err: &IndexerError) {
        if let IndexerError::Aborted(_) = err {
            tracing::info!(error = %err, "Cycle aborted");
            return;
        }
        if err.is_fatal() {
            tracing::error!(
                kind = err.kind(),
                height = ?err.height(),
                error = %err,
                "Fatal error, halting pipeline"
            );
            self.halted = Some(err.to_string());
        } else {
            tracing::warn!(kind = err.kind(), height = ?err.height(), error = %err, "Cycle failed");
        }
        let retries = self.provider.retries();
        self.publish(|s| {
            s.record_error(err);
            s.provider_retries = retries;
        });
    }

    fn enter(&self, state: PipelineState) {
        tracing::trace!(%state, "Pipeline state");
        self.publish(|s| s.state = state);
    }

    fn publish(&self, f: impl FnOnce(&mut PipelineStatus)) {
        self.status.send_modify(|s| {
            f(s);
            s.updated_at = chrono::Utc::now().timestamp();
        });
    }
}

/// Check that headers and logs fetched for one batch describe a single fork.
fn verify_view(
    checkpoint: Option<&Checkpoint>,
    next: u64,
    target: u64,
    fetched: &Fetched,
) -> Result<(), IndexerError> {
    let headers = &fetched.headers;
    let Some(first) = headers.first() else {
        return Ok(());
    };

    for pair in headers.windows(2) {
        if !pair[1].extends(&pair[0]) {
            return Err(IndexerError::InconsistentView {
                height: pair[1].number,
                reason: format!("header {} does not extend {}", pair[1], pair[0]),
            });
        }
    }

    if first.number == next {
        if let Some(cp) = checkpoint {
            if first.parent_hash != cp.block_hash {
                return Err(IndexerError::InconsistentView {
                    height: next,
                    reason: format!("parent {} is not checkpoint {}", first.parent_hash, cp),
                });
            }
        }
    }

    for log in &fetched.logs {
        if log.block_number < next || log.block_number > target {
            return Err(IndexerError::InconsistentView {
                height: log.block_number,
                reason: format!("log outside requested range {next}..={target}"),
            });
        }
        if let Some(header) = log
            .block_number
            .checked_sub(first.number)
            .and_then(|i| headers.get(i as usize))
        {
            if header.hash != log.block_hash {
                return Err(IndexerError::InconsistentView {
                    height: log.block_number,
                    reason: format!("log block hash {} differs from header {}", log.block_hash, header.hash),
                });
            }
        }
    }
    Ok(())
}
