//! Operational HTTP Server
//!
//! Liveness, readiness and Prometheus metrics for the replicator process.
//! Readiness flips on once every replication task has been spawned.

use crate::error::{Error, Result};
use crate::replicator::ReplicatorMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared readiness flag
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct OpsState {
    metrics: Arc<ReplicatorMetrics>,
    readiness: Readiness,
}

/// Build the operational router
pub fn ops_router(metrics: Arc<ReplicatorMetrics>, readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(OpsState { metrics, readiness })
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readiness_check(State(state): State<OpsState>) -> impl IntoResponse {
    if state.readiness.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn render_metrics(State(state): State<OpsState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve the operational endpoints until `shutdown` fires
pub async fn run_ops_server(
    addr: SocketAddr,
    metrics: Arc<ReplicatorMetrics>,
    readiness: Readiness,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind ops server: {}", e)))?;
    serve(listener, ops_router(metrics, readiness), shutdown).await
}

async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "ops server listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("ops server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("Ops server error: {}", e)))?;

    Ok(())
}
