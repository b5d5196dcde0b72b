//! Health, readiness and metrics endpoints served on the metrics port.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::Arc;

use crate::app::AppRegistry;
use crate::metrics::ShuffleMetrics;

pub struct HealthState {
    pub metrics: ShuffleMetrics,
    pub apps: Arc<AppRegistry>,
}

pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Ready once an application's output is being served.
async fn ready(State(state): State<Arc<HealthState>>) -> Result<&'static str, StatusCode> {
    if state.apps.active().is_some() {
        Ok("OK")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> Result<String, StatusCode> {
    state
        .metrics
        .encode()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state() -> Arc<HealthState> {
        Arc::new(HealthState {
            metrics: ShuffleMetrics::new(),
            apps: Arc::new(AppRegistry::new()),
        })
    }

    async fn get_status(router: Router, uri: &str) -> StatusCode {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn ready_follows_active_application() {
        let state = state();
        assert_eq!(
            get_status(health_router(state.clone()), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        state.apps.init_app("alice", "app_1");
        assert_eq!(
            get_status(health_router(state.clone()), "/ready").await,
            StatusCode::OK
        );
        assert_eq!(get_status(health_router(state), "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_text() {
        let state = state();
        state.metrics.outputs_failed.inc();
        let resp = health_router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("stagefetch_shuffle_outputs_failed_total 1"));
    }
}
