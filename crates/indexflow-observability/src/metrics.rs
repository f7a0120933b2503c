//! Prometheus metrics rendered from the pipeline status snapshot.

use std::sync::{Mutex, PoisonError};

use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

use indexflow_core::{PipelineState, PipelineStatus};

/// Namespace prefix for every metric name.
pub const NAMESPACE: &str = "indexflow";

/// Central metrics handle for the index node.
pub struct IndexerMetrics {
    registry: Registry,
    checkpoint_height: IntGauge,
    chain_head_height: IntGauge,
    blocks_behind: IntGauge,
    events_applied: IntCounter,
    events_skipped: IntCounter,
    events_retracted: IntCounter,
    blocks_indexed: IntCounter,
    reorgs: IntCounter,
    provider_retries: IntCounter,
    batch_size: IntGauge,
    blocks_per_second: Gauge,
    pipeline_state: IntGaugeVec,
    halted: IntGauge,
    errors: IntCounterVec,
    last_error_timestamp: IntGaugeVec,
    rpc_rate_limits: IntCounterVec,
    rpc_available: IntGaugeVec,
    /// Serializes counter catch-up between concurrent scrapes.
    update: Mutex<()>,
}

impl IndexerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        let int_gauge = |name: &str, help: &str| -> prometheus::Result<IntGauge> {
            let g = IntGauge::new(name, help)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let checkpoint_height = int_gauge("checkpoint_height", "Height of the last indexed block")?;
        let chain_head_height = int_gauge("chain_head_height", "Latest chain head seen by the pipeline")?;
        let blocks_behind = int_gauge("blocks_behind", "Blocks between the checkpoint and the chain head")?;
        let events_applied = counter("events_applied_total", "Domain events applied to the index")?;
        let events_skipped = counter("events_skipped_total", "Logs skipped with an unrecognized signature")?;
        let events_retracted = counter("events_retracted_total", "Domain events retracted by reorg rollbacks")?;
        let blocks_indexed = counter("blocks_indexed_total", "Blocks covered by committed batches")?;
        let reorgs = counter("reorgs_total", "Chain reorganizations rolled back")?;
        let provider_retries = counter("provider_retries_total", "Chain provider calls retried")?;
        let batch_size = int_gauge("batch_size", "Current log batch size in blocks")?;
        let halted = int_gauge("halted", "1 if the pipeline stopped on a fatal error")?;

        let blocks_per_second = Gauge::new(
            "ingestion_blocks_per_second",
            "Throughput of the most recent batch",
        )?;
        registry.register(Box::new(blocks_per_second.clone()))?;

        let pipeline_state = IntGaugeVec::new(
            Opts::new("pipeline_state", "1 for the pipeline's current state"),
            &["state"],
        )?;
        registry.register(Box::new(pipeline_state.clone()))?;

        let errors = IntCounterVec::new(
            Opts::new("errors_total", "Pipeline errors by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        let last_error_timestamp = IntGaugeVec::new(
            Opts::new(
                "last_error_timestamp_seconds",
                "Unix time of the most recent error, by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(last_error_timestamp.clone()))?;

        let rpc_rate_limits = IntCounterVec::new(
            Opts::new(
                "rpc_provider_rate_limit_total",
                "Calls refused by an RPC endpoint with a rate limit",
            ),
            &["url"],
        )?;
        registry.register(Box::new(rpc_rate_limits.clone()))?;

        let rpc_available = IntGaugeVec::new(
            Opts::new(
                "rpc_provider_available",
                "1 if the RPC endpoint is in rotation (not cooling down or disabled)",
            ),
            &["url"],
        )?;
        registry.register(Box::new(rpc_available.clone()))?;

        Ok(Self {
            registry,
            checkpoint_height,
            chain_head_height,
            blocks_behind,
            events_applied,
            events_skipped,
            events_retracted,
            blocks_indexed,
            reorgs,
            provider_retries,
            batch_size,
            blocks_per_second,
            pipeline_state,
            halted,
            errors,
            last_error_timestamp,
            rpc_rate_limits,
            rpc_available,
            update: Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Bring every metric in line with `status`.
    ///
    /// Counters advance by the difference to the snapshot's cumulative totals,
    /// so calling this repeatedly with the same snapshot is a no-op.
    pub fn update(&self, status: &PipelineStatus) {
        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);

        set_u64(&self.checkpoint_height, status.checkpoint_height.unwrap_or(0));
        set_u64(&self.chain_head_height, status.chain_head.unwrap_or(0));
        set_u64(&self.blocks_behind, status.blocks_behind().unwrap_or(0));
        set_u64(&self.batch_size, status.batch_size);
        self.blocks_per_second.set(status.blocks_per_second);
        self.halted.set(i64::from(status.is_halted()));

        catch_up(&self.events_applied, status.events_applied);
        catch_up(&self.events_skipped, status.events_skipped);
        catch_up(&self.events_retracted, status.events_retracted);
        catch_up(&self.blocks_indexed, status.blocks_indexed);
        catch_up(&self.reorgs, status.reorgs);
        catch_up(&self.provider_retries, status.provider_retries);

        for state in PipelineState::ALL {
            self.pipeline_state
                .with_label_values(&[state.as_str()])
                .set(i64::from(state == status.state));
        }

        for (kind, count) in &status.errors {
            catch_up(&self.errors.with_label_values(&[kind.as_str()]), *count);
        }
        if let Some(last) = &status.last_error {
            self.last_error_timestamp
                .with_label_values(&[last.kind.as_str()])
                .set(last.at);
        }

        for endpoint in &status.endpoints {
            let url = [endpoint.url.as_str()];
            catch_up(&self.rpc_rate_limits.with_label_values(&url), endpoint.rate_limited);
            self.rpc_available
                .with_label_values(&url)
                .set(i64::from(endpoint.is_available()));
        }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn set_u64(gauge: &IntGauge, v: u64) {
    gauge.set(i64::try_from(v).unwrap_or(i64::MAX));
}

fn catch_up(counter: &IntCounter, total: u64) {
    let delta = total.saturating_sub(counter.get());
    if delta > 0 {
        counter.inc_by(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexflow_core::{EndpointStats, IndexerError};

    fn status() -> PipelineStatus {
        let mut s = PipelineStatus::new(500);
        s.state = PipelineState::Applying;
        s.checkpoint_height = Some(100);
        s.chain_head = Some(130);
        s.events_applied = 7;
        s.events_skipped = 2;
        s
    }

    #[test]
    fn renders_prefixed_names() {
        let m = IndexerMetrics::new().unwrap();
        m.update(&status());
        let text = m.render().unwrap();
        assert!(text.contains("indexflow_checkpoint_height 100"));
        assert!(text.contains("indexflow_chain_head_height 130"));
        assert!(text.contains("indexflow_blocks_behind 30"));
        assert!(text.contains("indexflow_events_applied_total 7"));
        assert!(text.contains("indexflow_events_skipped_total 2"));
        assert!(text.contains("indexflow_batch_size 500"));
        assert!(text.contains("indexflow_pipeline_state{state=\"applying\"} 1"));
        assert!(text.contains("indexflow_pipeline_state{state=\"idle\"} 0"));
        assert!(text.contains("indexflow_halted 0"));
    }

    #[test]
    fn counters_follow_snapshot_totals() {
        let m = IndexerMetrics::new().unwrap();
        let mut s = status();
        m.update(&s);
        m.update(&s);
        assert_eq!(m.events_applied.get(), 7);

        s.events_applied = 10;
        m.update(&s);
        assert_eq!(m.events_applied.get(), 10);
    }

    #[test]
    fn errors_by_kind() {
        let m = IndexerMetrics::new().unwrap();
        let mut s = status();
        s.record_error(&IndexerError::ProviderUnavailable("reset".into()));
        s.record_error(&IndexerError::ProviderUnavailable("reset".into()));
        s.state = PipelineState::Halted;
        m.update(&s);

        let text = m.render().unwrap();
        assert!(text.contains("indexflow_errors_total{kind=\"provider_unavailable\"} 2"));
        assert!(text.contains("indexflow_last_error_timestamp_seconds{kind=\"provider_unavailable\"}"));
        assert!(text.contains("indexflow_halted 1"));
    }

    #[test]
    fn rpc_endpoint_health_by_url() {
        let m = IndexerMetrics::new().unwrap();
        let mut s = status();
        s.endpoints = vec![
            EndpointStats {
                url: "http://a".into(),
                rate_limited: 3,
                cooling_down: true,
                disabled: false,
            },
            EndpointStats {
                url: "http://b".into(),
                ..Default::default()
            },
        ];
        m.update(&s);
        m.update(&s);

        let text = m.render().unwrap();
        assert!(text.contains("indexflow_rpc_provider_rate_limit_total{url=\"http://a\"} 3"));
        assert!(text.contains("indexflow_rpc_provider_rate_limit_total{url=\"http://b\"} 0"));
        assert!(text.contains("indexflow_rpc_provider_available{url=\"http://a\"} 0"));
        assert!(text.contains("indexflow_rpc_provider_available{url=\"http://b\"} 1"));
    }
}
