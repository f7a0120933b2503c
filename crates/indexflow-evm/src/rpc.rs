//! JSON-RPC 2.0 wire types and a minimal HTTP transport.
//!
//! The transport sends each request exactly once. Retry, timeout and
//! bisection policy belong to the pipeline, so errors are classified here
//! into [`IndexerError`] and handed straight back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use indexflow_core::IndexerError;

// ─── Wire types ───────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the node's error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Errors from a single JSON-RPC round trip.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection refused, reset, TLS failure, etc.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// JSON-RPC error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Well-formed JSON-RPC, but not a usable answer.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// What a failure says about the endpoint that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointFault {
    /// Throttled; usable again after a cooldown.
    RateLimited,
    /// Wrong URL or a node that does not serve the method.
    Unusable,
}

/// Message fragments providers use when an `eth_getLogs` range is too big.
const RANGE_TOO_LARGE_HINTS: &[&str] = &[
    "block range",
    "range is too large",
    "range too large",
    "exceed maximum block range",
    "query returned more than",
    "more than 10000 results",
    "log response size exceeded",
    "is limited to",
    "query timeout exceeded",
    "too many blocks",
];

/// Message fragments of throttling responses.
const RATE_LIMIT_HINTS: &[&str] = &[
    "rate limit",
    "too many requests",
    "request limit exceeded",
    "exceeded rate limit",
    "context deadline exceeded",
];

const UNUSABLE_HINTS: &[&str] = &["invalid method", "method not found"];

impl RpcError {
    /// Returns `true` if the node rejected the request because the log
    /// range or result set was too large.
    pub fn is_range_too_large(&self) -> bool {
        match self {
            Self::Rpc(e) => {
                let msg = e.message.to_ascii_lowercase();
                RANGE_TOO_LARGE_HINTS.iter().any(|h| msg.contains(h))
            }
            Self::Status { status: 413, .. } => true,
            _ => false,
        }
    }

    /// Endpoint-level fault, if this error is one. Oversized log ranges are
    /// never endpoint faults, even when the node reports them as `-32005`.
    pub fn endpoint_fault(&self) -> Option<EndpointFault> {
        if self.is_range_too_large() {
            return None;
        }
        match self {
            Self::Status { status: 429, .. } => return Some(EndpointFault::RateLimited),
            Self::Status { status: 404, .. } => return Some(EndpointFault::Unusable),
            Self::Rpc(e) if e.code == -32005 || e.code == 429 => {
                return Some(EndpointFault::RateLimited)
            }
            Self::Rpc(e) if e.code == -32601 => return Some(EndpointFault::Unusable),
            Self::Deserialization(_) | Self::InvalidResponse(_) => return None,
            _ => {}
        }
        let msg = self.to_string().to_ascii_lowercase();
        if RATE_LIMIT_HINTS.iter().any(|h| msg.contains(h)) {
            Some(EndpointFault::RateLimited)
        } else if UNUSABLE_HINTS.iter().any(|h| msg.contains(h)) {
            Some(EndpointFault::Unusable)
        } else {
            None
        }
    }

    /// Classify into the pipeline's taxonomy.
    ///
    /// `range` is the block range of an `eth_getLogs` call, if that is what failed.
    pub fn classify(self, range: Option<(u64, u64)>) -> IndexerError {
        match range {
            Some((from, to)) if self.is_range_too_large() => {
                IndexerError::RangeTooLarge { from, to }
            }
            _ => IndexerError::ProviderUnavailable(self.to_string()),
        }
    }
}

// ─── Transport ────────────────────────────────────────────────────────────────

/// Single-shot HTTP JSON-RPC transport backed by `reqwest`.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Http(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            http,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request and decode its `result` into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self.http.post(&self.url).json(&req).send().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }
            } else {
                RpcError::Http(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Status { status, body });
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;
        let value = body.into_result().map_err(RpcError::Rpc)?;
        tracing::trace!(method, id, "rpc response");
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_err(code: i64, message: &str) -> RpcError {
        RpcError::Rpc(JsonRpcError {
            code,
            message: message.into(),
            data: None,
        })
    }

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(7, "eth_getLogs", vec![]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_getLogs\""));
        assert!(json.contains("\"id\":7"));
    }

    #[test]
    fn response_error_wins_over_result() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#,
        )
        .unwrap();
        assert_eq!(resp.into_result().unwrap_err().code, -32005);
    }

    #[test]
    fn provider_range_messages_are_recognized() {
        for msg in [
            "query returned more than 10000 results",
            "Log response size exceeded. You can make eth_getLogs requests with up to a 2K block range",
            "eth_getLogs is limited to a 10,000 range",
            "block range is too wide",
        ] {
            let err = rpc_err(-32005, msg).classify(Some((1, 5000)));
            assert!(
                matches!(err, IndexerError::RangeTooLarge { from: 1, to: 5000 }),
                "{msg}"
            );
        }
    }

    #[test]
    fn other_failures_are_provider_unavailable() {
        let err = rpc_err(-32000, "header not found").classify(Some((1, 2)));
        assert!(matches!(err, IndexerError::ProviderUnavailable(_)));

        let err = RpcError::Status {
            status: 429,
            body: "slow down".into(),
        }
        .classify(None);
        assert!(err.is_retryable());

        // Range hints only matter for log queries.
        let err = rpc_err(-32005, "block range too large").classify(None);
        assert!(matches!(err, IndexerError::ProviderUnavailable(_)));
    }

    #[test]
    fn endpoint_faults() {
        let status = |status: u16, body: &str| RpcError::Status {
            status,
            body: body.into(),
        };
        assert_eq!(
            status(429, "slow down").endpoint_fault(),
            Some(EndpointFault::RateLimited)
        );
        assert_eq!(
            rpc_err(-32005, "limit exceeded").endpoint_fault(),
            Some(EndpointFault::RateLimited)
        );
        assert_eq!(
            status(503, "Rate limit reached for this key").endpoint_fault(),
            Some(EndpointFault::RateLimited)
        );
        assert_eq!(
            status(404, "not found").endpoint_fault(),
            Some(EndpointFault::Unusable)
        );
        assert_eq!(
            rpc_err(-32601, "the method eth_getLogs does not exist").endpoint_fault(),
            Some(EndpointFault::Unusable)
        );
        // An oversized range is for the caller to bisect, not a throttle.
        assert_eq!(
            rpc_err(-32005, "query returned more than 10000 results").endpoint_fault(),
            None
        );
        assert_eq!(RpcError::Http("connection reset".into()).endpoint_fault(), None);
        assert_eq!(RpcError::Timeout { ms: 10 }.endpoint_fault(), None);
    }
}
