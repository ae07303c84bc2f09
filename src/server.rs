// HTTP front end
//
// Routes:
// - POST /api/v1/task  submit a task for {"user_id": "..."}
// - GET  /health       liveness
// - GET  /metrics      Prometheus text exposition (when enabled)

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::admission::{Admission, SubmitOutcome};
use crate::metrics;

pub const QUEUED_MESSAGE: &str = "Task queued successfully";
pub const MISSING_USER_MESSAGE: &str = "user_id is required";
pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Try again later.";
pub const QUEUE_UNAVAILABLE_MESSAGE: &str = "Task queue unavailable";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub admission: Admission,
}

/// Body of a task submission
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Build the router; `/metrics` is mounted only when `expose_metrics` is set
pub fn router(state: AppState, expose_metrics: bool) -> Router {
    let mut app = Router::new()
        .route("/api/v1/task", post(submit_handler))
        .route("/health", get(health_handler));

    if expose_metrics {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve `app` on `addr` until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {}", addr))?;

    info!("Accepting task submissions on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;

    Ok(())
}

async fn submit_handler(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Malformed submission: {}", rejection);
            metrics::record_submission(metrics::outcome::INVALID);
            return error_response(StatusCode::BAD_REQUEST, MISSING_USER_MESSAGE);
        }
    };

    match state.admission.submit(request.user_id.as_deref()).await {
        SubmitOutcome::Admitted { .. } => (
            StatusCode::OK,
            Json(StatusBody {
                status: QUEUED_MESSAGE,
            }),
        )
            .into_response(),
        SubmitOutcome::InvalidRequest(_) => {
            error_response(StatusCode::BAD_REQUEST, MISSING_USER_MESSAGE)
        }
        SubmitOutcome::Rejected { retry_after, .. } => {
            let mut response =
                error_response(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
            response
        }
        SubmitOutcome::QueueUnavailable(_) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, QUEUE_UNAVAILABLE_MESSAGE)
        }
    }
}

/// Whole seconds for the Retry-After header, rounded up and at least 1
fn retry_after_secs(retry_after: Duration) -> u64 {
    let millis = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000).max(1)
}

fn error_response(status: StatusCode, message: &'static str) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
