//! HTTP health, metrics and stats endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::modules::cto_monitor::{CtoMonitor, MonitorStats};
use crate::utils::MetricsService;

/// Query params for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    uptime: f64,
    poller_running: bool,
    seen_tokens: usize,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub monitor: CtoMonitor,
    pub metrics: Arc<MetricsService>,
}

/// Health server
pub struct HealthServer {
    port: u16,
    state: AppState,
}

impl HealthServer {
    pub fn new(port: u16, monitor: CtoMonitor, metrics: Arc<MetricsService>) -> Self {
        Self {
            port,
            state: AppState { monitor, metrics },
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(get_metrics))
            .route("/api/stats", get(get_stats))
            .route("/api/seen", get(get_seen))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serve until the task is cancelled
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        crate::log_success!("HEALTH", "Health server listening on http://localhost:{}", self.port);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.monitor.get_stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime: state.monitor.uptime().as_secs_f64(),
        poller_running: stats.is_running,
        seen_tokens: stats.seen_tokens,
    })
}

async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.get_metrics() {
        Ok(body) => (
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(target: "HEALTH", "Metrics encoding failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_stats(State(state): State<AppState>) -> Json<MonitorStats> {
    Json(state.monitor.get_stats())
}

async fn get_seen(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<String>> {
    let limit = params.limit.unwrap_or(50).min(500);
    Json(state.monitor.recent_seen(limit))
}
