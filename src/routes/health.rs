use axum::{
    extract::Extension, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;

use crate::notification::service::{DependencyStatus, NotificationService};

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    message: String,
}

/// State of one backing service
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DependencyHealth {
    #[schema(example = "postgres")]
    backend: String,
    #[schema(example = "ok")]
    status: String,
    error: Option<String>,
}

impl From<DependencyStatus> for DependencyHealth {
    fn from(status: DependencyStatus) -> Self {
        Self {
            backend: status.backend.to_string(),
            status: if status.is_up() { "ok" } else { "error" }.to_string(),
            error: status.error,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ReadinessResponse {
    #[schema(example = "ok")]
    status: String,
    store: DependencyHealth,
    channel: DependencyHealth,
}

/// Public health check endpoint
///
/// Returns status "ok" if the service is running
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            message: "Server is running".to_string(),
        }),
    )
}

/// Readiness check
///
/// Pings the notification store and the event channel separately.
#[utoipa::path(
    get,
    path = "/api/health/ready",
    responses(
        (status = 200, description = "Store and channel reachable", body = ReadinessResponse),
        (status = 503, description = "Store or channel unreachable", body = ReadinessResponse)
    ),
    tag = "health"
)]
pub async fn readiness_check(
    Extension(notification_service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    let (store, channel) = tokio::join!(
        notification_service.store_status(),
        notification_service.channel_status()
    );

    let ready = store.is_up() && channel.is_up();
    if !ready {
        warn!(
            "Not ready: store {} {:?}, channel {} {:?}",
            store.backend, store.error, channel.backend, channel.error
        );
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ok" } else { "degraded" }.to_string(),
            store: store.into(),
            channel: channel.into(),
        }),
    )
}

pub fn routes(notification_service: Arc<NotificationService>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/health/ready", get(readiness_check))
        .layer(Extension(notification_service))
}
