//! Failover across several RPC endpoints.
//!
//! Each call walks the endpoints round-robin and tries each one at most once.
//! Throttled endpoints sit out a cooldown; endpoints that cannot serve the
//! node API are dropped from rotation. The pool never sleeps or retries on
//! its own: when every endpoint fails, the last error goes back to the
//! pipeline's retry policy.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use indexflow_core::{BlockRef, ChainClient, EndpointStats, IndexerError, LogFilter, RawLog};

use crate::client::RpcChainClient;
use crate::rpc::{EndpointFault, RpcError};

/// How long a rate-limited endpoint is skipped.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Default)]
struct EndpointState {
    cooldown_until: Option<Instant>,
    disabled: bool,
    rate_limited: u64,
}

struct Endpoint {
    client: RpcChainClient,
    state: Mutex<EndpointState>,
}

impl Endpoint {
    fn lock(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cool_down(&self, period: Duration) {
        let now = Instant::now();
        let mut state = self.lock();
        state.rate_limited += 1;
        if state.cooldown_until.is_some_and(|until| until > now) {
            return;
        }
        state.cooldown_until = Some(now + period);
        tracing::warn!(
            url = self.client.url(),
            cooldown_ms = period.as_millis() as u64,
            "RPC endpoint rate limited; cooling down"
        );
    }

    fn disable(&self, err: &RpcError) {
        let mut state = self.lock();
        if !state.disabled {
            state.disabled = true;
            tracing::error!(url = self.client.url(), error = %err, "Disabling RPC endpoint");
        }
    }

    fn stats(&self, now: Instant) -> EndpointStats {
        let state = self.lock();
        EndpointStats {
            url: self.client.url().to_string(),
            rate_limited: state.rate_limited,
            cooling_down: state.cooldown_until.is_some_and(|until| until > now),
            disabled: state.disabled,
        }
    }
}

/// A [`ChainClient`] over several JSON-RPC endpoints.
pub struct RpcProviderPool {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
    cooldown: Duration,
}

impl RpcProviderPool {
    /// One HTTP client per URL, each with `timeout`.
    pub fn new<I, S>(urls: I, timeout: Duration) -> Result<Self, IndexerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let clients = urls
            .into_iter()
            .map(|url| RpcChainClient::new(url, timeout))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_clients(clients)
    }

    pub fn from_clients(clients: Vec<RpcChainClient>) -> Result<Self, IndexerError> {
        if clients.is_empty() {
            return Err(IndexerError::Config(
                "at least one RPC URL must be provided".into(),
            ));
        }
        Ok(Self {
            endpoints: clients
                .into_iter()
                .map(|client| Endpoint {
                    client,
                    state: Mutex::new(EndpointState::default()),
                })
                .collect(),
            cursor: AtomicUsize::new(0),
            cooldown: DEFAULT_COOLDOWN,
        })
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Next untried endpoint from the round-robin cursor. Prefers endpoints
    /// that are not cooling down, then the one whose cooldown ends first.
    fn select(&self, tried: &[bool]) -> Option<usize> {
        let n = self.endpoints.len();
        let now = Instant::now();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        let mut fallback: Option<(usize, Instant)> = None;
        for i in (0..n).map(|k| (start + k) % n).filter(|&i| !tried[i]) {
            let state = self.endpoints[i].lock();
            if state.disabled {
                continue;
            }
            match state.cooldown_until {
                Some(until) if until > now => {
                    if fallback.map_or(true, |(_, best)| until < best) {
                        fallback = Some((i, until));
                    }
                }
                _ => return Some(i),
            }
        }
        if let Some((i, until)) = fallback {
            tracing::warn!(
                url = self.endpoints[i].client.url(),
                ready_in_ms = until.saturating_duration_since(now).as_millis() as u64,
                "All RPC endpoints cooling down; using the one ready soonest"
            );
        }
        fallback.map(|(i, _)| i)
    }

    async fn call<'a, T, F, Fut>(
        &'a self,
        range: Option<(u64, u64)>,
        f: F,
    ) -> Result<T, IndexerError>
    where
        F: Fn(&'a RpcChainClient) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut tried = vec![false; self.endpoints.len()];
        let mut last = None;
        while let Some(i) = self.select(&tried) {
            tried[i] = true;
            let endpoint = &self.endpoints[i];
            match f(&endpoint.client).await {
                Ok(value) => return Ok(value),
                Err(e) => match e.endpoint_fault() {
                    Some(EndpointFault::RateLimited) => {
                        endpoint.cool_down(self.cooldown);
                        last = Some(e);
                    }
                    Some(EndpointFault::Unusable) => {
                        endpoint.disable(&e);
                        last = Some(e);
                    }
                    None => return Err(e.classify(range)),
                },
            }
        }
        match last {
            Some(e) => Err(e.classify(range)),
            None => Err(IndexerError::Config("every RPC endpoint is disabled".into())),
        }
    }
}

#[async_trait]
impl ChainClient for RpcProviderPool {
    async fn head_block(&self) -> Result<BlockRef, IndexerError> {
        self.call(None, |c| c.fetch_head()).await
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<BlockRef>, IndexerError> {
        self.call(None, |c| c.fetch_block(height)).await
    }

    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        self.call(Some((from, to)), |c| c.fetch_logs(from, to, filter))
            .await
    }

    fn endpoint_stats(&self) -> Vec<EndpointStats> {
        let now = Instant::now();
        self.endpoints.iter().map(|e| e.stats(now)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(urls: &[&str]) -> RpcProviderPool {
        RpcProviderPool::new(urls.iter().copied(), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn empty_pool_is_a_config_error() {
        let err = RpcProviderPool::new(Vec::<String>::new(), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, IndexerError::Config(_)));
    }

    #[test]
    fn select_round_robins() {
        let p = pool(&["http://a", "http://b", "http://c"]);
        let tried = [false; 3];
        let picks: Vec<_> = (0..4).map(|_| p.select(&tried).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn select_skips_cooling_and_disabled() {
        let p = pool(&["http://a", "http://b", "http://c"]);
        p.endpoints[0].cool_down(Duration::from_secs(60));
        p.endpoints[1].disable(&RpcError::Status {
            status: 404,
            body: String::new(),
        });
        for _ in 0..3 {
            assert_eq!(p.select(&[false; 3]), Some(2));
        }
        // Only cooling endpoints left: fall back to one of them.
        assert_eq!(p.select(&[false, false, true]), Some(0));
        assert_eq!(p.select(&[true, false, true]), None);
    }

    #[test]
    fn fallback_prefers_shortest_cooldown() {
        let p = pool(&["http://a", "http://b"]);
        p.endpoints[0].cool_down(Duration::from_secs(120));
        p.endpoints[1].cool_down(Duration::from_secs(5));
        assert_eq!(p.select(&[false; 2]), Some(1));
        assert_eq!(p.select(&[false; 2]), Some(1));
    }

    #[test]
    fn repeated_rate_limits_do_not_extend_cooldown() {
        let p = pool(&["http://a"]);
        p.endpoints[0].cool_down(Duration::from_secs(60));
        let first = p.endpoints[0].lock().cooldown_until;
        p.endpoints[0].cool_down(Duration::from_secs(600));
        assert_eq!(p.endpoints[0].lock().cooldown_until, first);

        let stats = p.endpoint_stats();
        assert_eq!(stats[0].rate_limited, 2);
        assert!(stats[0].cooling_down);
        assert!(!stats[0].is_available());
    }
}
