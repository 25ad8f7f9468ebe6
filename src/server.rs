//! HTTP server exposing `/healthz`, `/readyz`, `/metrics`, `/status`, and the
//! admin control surface (`/admin/*`) that `fleetctl` drives remotely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::autoscaler::reconciler::Autoscaler;
use crate::autoscaler::status::{DebugSink, KEY_AUTOSCALING_STATUS};
use crate::model::ResourceBundle;
use crate::observability::metrics;

#[derive(Clone)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
    pub debug_sink: Arc<dyn DebugSink>,
    pub autoscaler: Arc<Mutex<Autoscaler>>,
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .route("/admin/request-resources", post(request_resources_handler))
        .route("/admin/kill-workers", post(kill_workers_handler))
        .route("/admin/tick", post(tick_handler))
        .with_state(state)
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<ServerState>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let metric_families = metrics::gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(%error, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (
        StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_else(|_| String::from("")),
    )
}

async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    match state.debug_sink.get(KEY_AUTOSCALING_STATUS).await {
        Some(status) => (StatusCode::OK, status),
        None => (StatusCode::OK, "no tick has completed yet".to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct RequestResourcesBody {
    bundles: Vec<ResourceBundle>,
}

/// `fleetctl request-resources`: calls `Autoscaler::request_resources`.
async fn request_resources_handler(
    State(state): State<ServerState>,
    Json(body): Json<RequestResourcesBody>,
) -> impl IntoResponse {
    let mut autoscaler = state.autoscaler.lock().await;
    autoscaler.request_resources(body.bundles);
    StatusCode::ACCEPTED
}

/// `fleetctl kill-workers`: calls `Autoscaler::kill_workers`.
async fn kill_workers_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let autoscaler = state.autoscaler.lock().await;
    autoscaler.kill_workers().await;
    StatusCode::ACCEPTED
}

/// `fleetctl tick`: forces one reconciliation cycle out-of-band from the
/// daemon's interval loop.
async fn tick_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let mut autoscaler = state.autoscaler.lock().await;
    match autoscaler.update().await {
        Ok(()) => StatusCode::OK,
        Err(error) => {
            tracing::error!(%error, "forced tick failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
