//! HTTP diagnostics surface: liveness, readiness, status, and metrics
//! endpoints. This router never gates or blocks ingestion — it only
//! reads shared state that the ingestion controller already maintains.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::ingestion::{IngestionMetrics, IngestionMetricsSnapshot};
use crate::processors::ProcessorRegistry;
use crate::status::{ServiceMode, ServiceStatus, StatusSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub status: Arc<ServiceStatus>,
    pub metrics: Arc<IngestionMetrics>,
    pub registry: ProcessorRegistry,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/diagnostics", get(diagnostics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    "notification-worker"
}

/// Liveness: the process is up and serving requests. Always 200.
async fn health() -> &'static str {
    "ok"
}

/// Readiness: 200 unless the derived mode is `Failed` — a `Degraded`
/// worker (e.g. a transient resubscribe) still accepts traffic. Only a
/// fully failed worker returns 503 so a load balancer or orchestrator
/// stops routing here.
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let mode = state.status.mode();
    let body = Json(ReadyBody { mode });
    if mode == ServiceMode::Failed {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, body)
    } else {
        (axum::http::StatusCode::OK, body)
    }
}

#[derive(Serialize)]
struct ReadyBody {
    mode: ServiceMode,
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot())
}

/// Returns JSON, not Prometheus text exposition — this worker has no
/// metrics scrape contract of its own.
async fn metrics(State(state): State<AppState>) -> Json<IngestionMetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[derive(Serialize)]
struct Diagnostics {
    status: StatusSnapshot,
    metrics: IngestionMetricsSnapshot,
    registered_processors: Vec<&'static str>,
}

async fn diagnostics(State(state): State<AppState>) -> Json<Diagnostics> {
    Json(Diagnostics {
        status: state.status.snapshot(),
        metrics: state.metrics.snapshot(),
        registered_processors: state.registry.registered_tags(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState {
            status: Arc::new(ServiceStatus::new()),
            metrics: Arc::new(IngestionMetrics::new()),
            registry: ProcessorRegistry::new(),
        }
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_is_503_when_failed() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ready_is_200_when_degraded() {
        let s = state();
        s.status.set_db_active(true);
        s.status.set_broker_active(true);
        // subscription_active left false: mode is Degraded, not Failed.
        let app = router(s);
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_is_200_when_all_active() {
        let s = state();
        s.status.set_db_active(true);
        s.status.set_broker_active(true);
        s.status.set_subscription_active(true);
        let app = router(s);
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn diagnostics_lists_registered_processors() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/diagnostics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
