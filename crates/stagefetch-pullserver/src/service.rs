//! The fetch endpoint.

use axum::{
    extract::{RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use stagefetch_core::FetchRequest;

use crate::app::AppRegistry;
use crate::chunk::resolve_chunks;
use crate::error::PullError;
use crate::layout::OutputLayout;
use crate::metrics::ShuffleMetrics;
use crate::transfer::chunk_body;

pub struct ShuffleState {
    pub layout: OutputLayout,
    pub apps: Arc<AppRegistry>,
    pub metrics: ShuffleMetrics,
    /// Read size when streaming chunks.
    pub buffer_size: usize,
}

/// `GET /?sid=..&p=..&type=..&ta=..` serves intermediate output; any other
/// method gets 405.
pub fn pull_router(state: Arc<ShuffleState>) -> Router {
    Router::new()
        .route("/", get(fetch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fetch(State(state): State<Arc<ShuffleState>>, RawQuery(query): RawQuery) -> Response {
    match serve(&state, query.unwrap_or_default()).await {
        Ok(resp) => resp,
        Err(err) => {
            state.metrics.outputs_failed.inc();
            err.into_response()
        }
    }
}

async fn serve(state: &ShuffleState, query: String) -> Result<Response, PullError> {
    let request = FetchRequest::from_query(&query)
        .map_err(|e| PullError::BadRequest(format!("{} in '{}'", e, query)))?;
    let app = state
        .apps
        .active()
        .ok_or_else(|| PullError::NotFound("no active application".to_string()))?;

    let layout = state.layout.clone();
    let chunks = tokio::task::spawn_blocking(move || resolve_chunks(&layout, &app, &request))
        .await
        .map_err(|e| PullError::Internal(format!("chunk resolution aborted: {}", e)))??;

    let total: u64 = chunks.iter().map(|c| c.length).sum();
    if total == 0 {
        debug!("No content for '{}'", query);
        state.metrics.outputs_ok.inc();
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    debug!("Serving {} byte(s) in {} chunk(s)", total, chunks.len());

    // Counted once the body has been read through, not when headers go out.
    let metrics = state.metrics.clone();
    let body = chunk_body(chunks, state.buffer_size, move |outcome| match outcome {
        Ok(sent) => {
            metrics.output_bytes.inc_by(sent);
            metrics.outputs_ok.inc();
        }
        Err(e) => {
            warn!("Transfer for '{}' failed: {}", query, e);
            metrics.outputs_failed.inc();
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, total)
        .body(body)
        .map_err(|e| PullError::Internal(format!("failed to build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use stagefetch_core::TaskAttempt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::app::AppIdentity;

    fn setup() -> (TempDir, Arc<ShuffleState>) {
        let dir = TempDir::new().unwrap();
        let apps = Arc::new(AppRegistry::new());
        apps.init_app("alice", "app_1");
        let state = Arc::new(ShuffleState {
            layout: OutputLayout::new([dir.path()]),
            apps,
            metrics: ShuffleMetrics::new(),
            buffer_size: 4,
        });
        (dir, state)
    }

    fn write_partition(state: &ShuffleState, task: u32, partition: u32, body: &[u8]) {
        let app = AppIdentity {
            user: "alice".into(),
            app_id: "app_1".into(),
        };
        let dir = state
            .layout
            .allocate_output_dir(&app, 1, TaskAttempt::new(task, 0))
            .unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(partition.to_string()), body).unwrap();
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn hash_fetch_concatenates_attempts() {
        let (_dir, state) = setup();
        write_partition(&state, 1, 3, b"hello ");
        write_partition(&state, 2, 3, b"world");

        let resp = pull_router(state.clone())
            .oneshot(get("/?sid=1&p=3&type=h&ta=1_0&ta=2_0"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "11");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello world");
        assert_eq!(state.metrics.output_bytes.get(), 11);
        assert_eq!(state.metrics.outputs_ok.get(), 1);
    }

    #[tokio::test]
    async fn empty_partition_is_no_content() {
        let (_dir, state) = setup();
        write_partition(&state, 1, 0, b"");
        let resp = pull_router(state)
            .oneshot(get("/?sid=1&p=0&type=h&ta=1_0"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn repeated_attempt_is_served_once() {
        let (_dir, state) = setup();
        write_partition(&state, 1, 0, b"abc");

        let resp = pull_router(state)
            .oneshot(get("/?sid=1&p=0&type=h&ta=1_0&ta=1_0"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "3");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"abc");
    }

    #[tokio::test]
    async fn failed_transfer_counts_as_failure() {
        let (_dir, state) = setup();
        write_partition(&state, 1, 0, b"abcdef");

        let resp = pull_router(state.clone())
            .oneshot(get("/?sid=1&p=0&type=h&ta=1_0"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.metrics.outputs_ok.get(), 0);

        // output removed between resolution and transfer
        let app = AppIdentity {
            user: "alice".into(),
            app_id: "app_1".into(),
        };
        let path = state
            .layout
            .hash_file(&app, 1, TaskAttempt::new(1, 0), 0)
            .unwrap();
        std::fs::remove_file(path).unwrap();

        assert!(resp.into_body().collect().await.is_err());
        assert_eq!(state.metrics.outputs_ok.get(), 0);
        assert_eq!(state.metrics.outputs_failed.get(), 1);
        assert_eq!(state.metrics.output_bytes.get(), 0);
    }

    #[tokio::test]
    async fn missing_partition_is_not_found() {
        let (_dir, state) = setup();
        let resp = pull_router(state.clone())
            .oneshot(get("/?sid=1&p=0&type=h&ta=9_0"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.metrics.outputs_failed.get(), 1);
    }

    #[tokio::test]
    async fn malformed_query_is_bad_request() {
        let (_dir, state) = setup();
        for uri in ["/", "/?sid=1&p=0&type=h", "/?sid=1&p=0&type=q&ta=1_0"] {
            let resp = pull_router(state.clone()).oneshot(get(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[tokio::test]
    async fn non_get_is_method_not_allowed() {
        let (_dir, state) = setup();
        let resp = pull_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/?sid=1&p=0&type=h&ta=1_0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn no_active_application_is_not_found() {
        let (_dir, state) = setup();
        write_partition(&state, 1, 0, b"rows");
        state.apps.stop_app("app_1");
        let resp = pull_router(state)
            .oneshot(get("/?sid=1&p=0&type=h&ta=1_0"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
