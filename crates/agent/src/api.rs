//! HTTP API for health checks, Prometheus metrics and probe results

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use netprobe_lib::{
    cycle::ProbeCycleOrchestrator,
    health::{ComponentStatus, HealthRegistry},
    observability::ProbeMetrics,
    store::OutcomeStore,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Rows returned when no limit is given
pub const DEFAULT_RESULT_LIMIT: usize = 50;

/// Largest page a client may ask for
pub const MAX_RESULT_LIMIT: usize = 500;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ProbeMetrics,
    pub orchestrator: Arc<ProbeCycleOrchestrator>,
    pub outcomes: Arc<dyn OutcomeStore>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ProbeMetrics,
        orchestrator: Arc<ProbeCycleOrchestrator>,
        outcomes: Arc<dyn OutcomeStore>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            orchestrator,
            outcomes,
        }
    }
}

/// Query parameters for the results endpoints
#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub target_id: Option<i64>,
    pub limit: Option<usize>,
}

impl ResultsQuery {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_RESULT_LIMIT)
            .min(MAX_RESULT_LIMIT)
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn ping_results(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResultsQuery>,
) -> Response {
    match state
        .outcomes
        .ping_outcomes(query.target_id, query.limit())
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn traceroute_results(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResultsQuery>,
) -> Response {
    match state
        .outcomes
        .traceroute_outcomes(query.target_id, query.limit())
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Report of the most recently finished cycle
async fn last_cycle(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.last_report().await {
        Some(report) => Json(report).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no probe cycle has finished yet"),
    }
}

/// Start a cycle in the background
async fn trigger_cycle(State(state): State<Arc<AppState>>) -> Response {
    // The pool is claimed before answering, so 202 always means a cycle runs
    let cycle = match state.orchestrator.try_start() {
        Ok(cycle) => cycle,
        Err(e) => return error_response(StatusCode::CONFLICT, e.to_string()),
    };

    tokio::spawn(async move {
        match cycle.await {
            Ok(Ok(report)) => info!(cycle_id = report.cycle_id, "Manual probe cycle finished"),
            Ok(Err(e)) => warn!(error = %e, "Manual probe cycle failed"),
            Err(e) => warn!(error = %e, "Manual probe cycle task ended abnormally"),
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "status": "started" }))).into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/results/ping", get(ping_results))
        .route("/api/results/traceroute", get(traceroute_results))
        .route("/api/cycles/last", get(last_cycle))
        .route("/api/cycles", axum::routing::post(trigger_cycle))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
