use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

use crate::notification::model::{
    MarkReadRequest, NotificationError, NotificationErrorResponse, NotificationRequest,
    NotificationsPageResponse, UnreadCountResponse,
};
use crate::notification::service::NotificationService;

// Query parameters for listing. `limit` and `page` stay raw so bad values fall back
// to defaults instead of rejecting the request.
#[derive(Debug, Deserialize)]
pub struct NotificationsQueryParams {
    pub recipient_user_id: i64,
    pub limit: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
#[into_params(style = Form, parameter_in = Query)]
pub struct RecipientQueryParams {
    /// User whose notifications are addressed
    #[schema(example = "1")]
    pub recipient_user_id: i64,
}

// Helper function to convert NotificationError to HTTP response
pub fn notification_error_to_response(
    err: NotificationError,
) -> (StatusCode, Json<NotificationErrorResponse>) {
    let (status, error_message, code) = match err {
        NotificationError::ValidationError(message) => {
            (StatusCode::BAD_REQUEST, message, "VALIDATION_ERROR")
        }
        NotificationError::NotFound => (
            StatusCode::NOT_FOUND,
            "Notification not found".to_string(),
            "NOT_FOUND",
        ),
        NotificationError::Conflict => (
            StatusCode::CONFLICT,
            "Notification is being updated concurrently, please retry".to_string(),
            "CONFLICT",
        ),
        NotificationError::DatabaseError(e) => {
            error!("Database error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "DB_ERROR",
            )
        }
        NotificationError::DeliveryError(e) => {
            error!("Delivery error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Live delivery unavailable".to_string(),
                "DELIVERY_ERROR",
            )
        }
        NotificationError::SerializationError(e) => {
            error!("Serialization error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process notification data".to_string(),
                "SERIALIZATION_ERROR",
            )
        }
        NotificationError::InternalError(e) => {
            error!("Internal error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "INTERNAL_SERVER_ERROR",
            )
        }
    };

    let error_response = NotificationErrorResponse {
        error: error_message,
        code: code.to_string(),
    };

    (status, Json(error_response))
}

/// Ingest a domain event
///
/// Merges the event into the recipient's open notification for the same entity and
/// type, or starts a new one, then pushes the result to live subscribers.
#[utoipa::path(
    post,
    path = "/api/notifications",
    tag = "notifications",
    request_body = NotificationRequest,
    responses(
        (status = 200, description = "Notification stored", body = Notification),
        (status = 400, description = "Invalid input", body = NotificationErrorResponse),
        (status = 409, description = "Concurrent update, retry", body = NotificationErrorResponse),
        (status = 500, description = "Internal server error", body = NotificationErrorResponse)
    )
)]
pub async fn send_notification(
    Extension(notification_service): Extension<Arc<NotificationService>>,
    Json(request): Json<NotificationRequest>,
) -> impl IntoResponse {
    info!(
        "Ingesting {} for user {} from {}",
        request.notification_type, request.recipient_user_id, request.sender_id
    );

    match notification_service.ingest_event(request).await {
        Ok(notification) => (StatusCode::OK, Json(notification)).into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// List a user's notifications
///
/// Unread notifications come first, newest first within each group.
#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "notifications",
    params(
        ("recipient_user_id" = i64, Query, description = "User whose notifications to list"),
        ("limit" = Option<i64>, Query, description = "Page size, defaults to 10", example = "10"),
        ("page" = Option<i64>, Query, description = "1-indexed page number", example = "1")
    ),
    responses(
        (status = 200, description = "One page of notifications", body = NotificationsPageResponse),
        (status = 400, description = "Invalid input", body = NotificationErrorResponse),
        (status = 500, description = "Internal server error", body = NotificationErrorResponse)
    )
)]
pub async fn get_notifications(
    Extension(notification_service): Extension<Arc<NotificationService>>,
    Query(params): Query<NotificationsQueryParams>,
) -> impl IntoResponse {
    let (limit, offset) =
        notification_service.page_bounds(params.limit.as_deref(), params.page.as_deref());

    match notification_service
        .fetch_page(params.recipient_user_id, limit, offset)
        .await
    {
        Ok((data, has_more)) => (
            StatusCode::OK,
            Json(NotificationsPageResponse { data, has_more }),
        )
            .into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Mark notifications as read
///
/// Unknown and already read ids are ignored.
#[utoipa::path(
    post,
    path = "/api/notifications/mark_read",
    tag = "notifications",
    request_body = MarkReadRequest,
    responses(
        (status = 204, description = "Notifications marked as read"),
        (status = 500, description = "Internal server error", body = NotificationErrorResponse)
    )
)]
pub async fn mark_read(
    Extension(notification_service): Extension<Arc<NotificationService>>,
    Json(request): Json<MarkReadRequest>,
) -> impl IntoResponse {
    match notification_service.mark_read(&request.notification_ids).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Number of unread notifications for a user
#[utoipa::path(
    get,
    path = "/api/notifications/unread_count",
    tag = "notifications",
    params(RecipientQueryParams),
    responses(
        (status = 200, description = "Unread count", body = UnreadCountResponse),
        (status = 400, description = "Invalid input", body = NotificationErrorResponse),
        (status = 500, description = "Internal server error", body = NotificationErrorResponse)
    )
)]
pub async fn unread_count(
    Extension(notification_service): Extension<Arc<NotificationService>>,
    Query(params): Query<RecipientQueryParams>,
) -> impl IntoResponse {
    match notification_service.counts(params.recipient_user_id).await {
        Ok((count, total)) => {
            (StatusCode::OK, Json(UnreadCountResponse { count, total })).into_response()
        }
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let (status, body) = notification_error_to_response(NotificationError::ValidationError(
            "recipient_user_id must be a positive id".to_string(),
        ));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "VALIDATION_ERROR");
        assert_eq!(body.error, "recipient_user_id must be a positive id");

        let (status, _) = notification_error_to_response(NotificationError::NotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = notification_error_to_response(NotificationError::Conflict);
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = notification_error_to_response(NotificationError::DatabaseError(
            sqlx::Error::PoolTimedOut,
        ));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "DB_ERROR");
    }
}
