//! HTTP surface: `GET /metrics` and `GET /health`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use indexflow_core::{ErrorReport, PipelineState, PipelineStatus};

use crate::metrics::IndexerMetrics;

/// Prometheus text exposition content type.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
struct AppState {
    metrics: Arc<IndexerMetrics>,
    status: watch::Receiver<PipelineStatus>,
}

#[derive(Debug, Serialize)]
struct Health {
    state: PipelineState,
    checkpoint_height: Option<u64>,
    chain_head: Option<u64>,
    blocks_behind: Option<u64>,
    last_error: Option<ErrorReport>,
}

/// Build the metrics router over the pipeline's status channel.
pub fn router(metrics: Arc<IndexerMetrics>, status: watch::Receiver<PipelineStatus>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(AppState { metrics, status })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.status.borrow().clone();
    state.metrics.update(&snapshot);
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let s = state.status.borrow().clone();
    let code = if s.is_halted() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        code,
        Json(Health {
            state: s.state,
            checkpoint_height: s.checkpoint_height,
            chain_head: s.chain_head,
            blocks_behind: s.blocks_behind(),
            last_error: s.last_error,
        }),
    )
}

/// Serve the router on `addr` until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<IndexerMetrics>,
    status: watch::Receiver<PipelineStatus>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Metrics server listening");
    axum::serve(listener, router(metrics, status))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use indexflow_core::IndexerError;
    use tower::ServiceExt;

    fn app(status: PipelineStatus) -> (Router, watch::Sender<PipelineStatus>) {
        let (tx, rx) = watch::channel(status);
        let metrics = Arc::new(IndexerMetrics::new().unwrap());
        (router(metrics, rx), tx)
    }

    async fn fetch(router: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let resp = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_exposition_text() {
        let mut s = PipelineStatus::new(2000);
        s.checkpoint_height = Some(42);
        let (router, _tx) = app(s);

        let (code, ct, body) = fetch(router, "/metrics").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(ct.as_deref(), Some(CONTENT_TYPE));
        assert!(body.contains("indexflow_checkpoint_height 42"));
    }

    #[tokio::test]
    async fn metrics_reflect_latest_snapshot() {
        let (router, tx) = app(PipelineStatus::new(2000));
        tx.send_modify(|s| s.events_applied = 9);

        let (_, _, body) = fetch(router, "/metrics").await;
        assert!(body.contains("indexflow_events_applied_total 9"));
    }

    #[tokio::test]
    async fn health_is_ok_until_halted() {
        let (router, tx) = app(PipelineStatus::new(2000));
        let (code, _, body) = fetch(router.clone(), "/health").await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.contains("\"state\":\"idle\""));

        tx.send_modify(|s| {
            s.state = PipelineState::Halted;
            s.record_error(&IndexerError::Storage("disk full".into()));
        });
        let (code, _, body) = fetch(router, "/health").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("disk full"));
    }

    #[tokio::test]
    async fn serve_stops_on_cancel() {
        let (_tx, rx) = watch::channel(PipelineStatus::new(1));
        let token = CancellationToken::new();
        token.cancel();
        serve(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(IndexerMetrics::new().unwrap()),
            rx,
            token,
        )
        .await
        .unwrap();
    }
}
