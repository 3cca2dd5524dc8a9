//! Health and metrics endpoints.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use squash_telemetry::{Metrics, MetricsSnapshot, build_sha};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::shutdown::ShutdownState;

#[derive(Clone)]
struct HttpState {
    metrics: Metrics,
    shutdown: watch::Receiver<ShutdownState>,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) state: ShutdownState,
    pub(crate) build: &'static str,
    pub(crate) metrics: MetricsSnapshot,
}

/// Router exposing `GET /health` and `GET /metrics`.
pub fn router(metrics: Metrics, shutdown: watch::Receiver<ShutdownState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .layer(TraceLayer::new_for_http())
        .with_state(HttpState { metrics, shutdown })
}

async fn health(State(state): State<HttpState>) -> (StatusCode, Json<HealthResponse>) {
    let current = *state.shutdown.borrow();
    let (code, status) = match current {
        ShutdownState::Running => (StatusCode::OK, "ok"),
        ShutdownState::Draining => (StatusCode::SERVICE_UNAVAILABLE, "draining"),
        ShutdownState::Terminated => (StatusCode::SERVICE_UNAVAILABLE, "terminated"),
    };
    (
        code,
        Json(HealthResponse {
            status,
            state: current,
            build: build_sha(),
            metrics: state.metrics.snapshot(),
        }),
    )
}

async fn metrics_text(State(state): State<HttpState>) -> Response {
    let rendered = state.metrics.render();
    let built = match rendered {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(body)),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("failed to render metrics"))
        }
    };
    built.unwrap_or_else(|err| {
        error!(error = %err, "failed to build metrics response");
        let mut fallback = Response::new(Body::empty());
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

/// Serve `router` on `addr` until `root` is cancelled.
///
/// # Errors
///
/// Returns [`AppError::MetricsServer`] if the listener cannot bind or the
/// server stops unexpectedly.
pub async fn serve_metrics(
    addr: SocketAddr,
    router: Router,
    root: CancellationToken,
) -> AppResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::MetricsServer { addr, source })?;
    info!(addr = %addr, "metrics listener started");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(root.cancelled_owned())
        .await
        .map_err(|source| AppError::MetricsServer { addr, source })
}
