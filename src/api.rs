use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Extension, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::clients::health::HealthChecker;
use crate::error::DispatchError;
use crate::models::health::HealthStatus;
use crate::models::message::NotificationRequest;
use crate::models::response::{ApiResponse, NotificationResponse};
use crate::router::{NotificationRouter, SubmitOutcome};
use crate::store::StatusStore;

pub struct AppState {
    pub router: NotificationRouter,
    pub store: Arc<dyn StatusStore>,
    pub health_checker: HealthChecker,
}

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Request-scoped correlation id, taken from the `X-Correlation-ID` header
/// or minted on entry, and echoed back on the response.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

async fn correlation_id_layer(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    response
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/notifications", post(submit_notification))
        .route("/api/v1/notifications/{id}", get(get_notification_status))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(correlation_id_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}

async fn submit_notification(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Json(request): Json<NotificationRequest>,
) -> Response {
    match state.router.submit(request, Some(correlation_id.0)).await {
        Ok(SubmitOutcome::Accepted {
            notification_id,
            status,
        }) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(
                NotificationResponse {
                    notification_id,
                    status,
                    created_at: chrono::Utc::now(),
                },
                "Notification queued successfully".to_string(),
            )),
        )
            .into_response(),
        Ok(SubmitOutcome::Duplicate {
            notification_id,
            status,
        }) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                NotificationResponse {
                    notification_id,
                    status,
                    created_at: chrono::Utc::now(),
                },
                "Notification already accepted".to_string(),
            )),
        )
            .into_response(),
        Ok(SubmitOutcome::PreferenceDisabled { channel }) => (
            StatusCode::OK,
            Json(ApiResponse::<NotificationResponse>::error(
                "Notification preference disabled".to_string(),
                format!("User has disabled {} notifications", channel),
            )),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_notification_status(
    State(state): State<Arc<AppState>>,
    Path(notification_id): Path<String>,
) -> Response {
    match state.store.get_status(&notification_id).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                record,
                "Notification status retrieved".to_string(),
            )),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(
                "Not found".to_string(),
                "Notification not found".to_string(),
            )),
        )
            .into_response(),
        Err(e) => error_response(e.into()),
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

fn error_response(error: DispatchError) -> Response {
    let status_code = match &error {
        DispatchError::Validation(_) | DispatchError::MissingRecipient(_) => {
            StatusCode::BAD_REQUEST
        }
        DispatchError::UserNotFound(_) | DispatchError::TemplateNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let message = if error.is_retryable() {
        "Submission failed, retry later".to_string()
    } else {
        "Submission rejected".to_string()
    };

    (
        status_code,
        Json(ApiResponse::<()>::error(error.to_string(), message)),
    )
        .into_response()
}
