use utoipa::OpenApi;

/// API documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Realtime Notifications API",
        version = "0.1.0",
        description = "Aggregated notifications with live delivery over SSE and WebSocket"
    ),
    paths(
        // Health check endpoints
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        // Notification endpoints
        crate::notification::controller::send_notification,
        crate::notification::controller::get_notifications,
        crate::notification::controller::mark_read,
        crate::notification::controller::unread_count,
        // Live delivery
        crate::realtime::sse::sse_handler,
        crate::realtime::websocket::ws_handler
    ),
    components(
        schemas(
            // Health schemas
            crate::routes::health::HealthResponse,
            crate::routes::health::ReadinessResponse,
            crate::routes::health::DependencyHealth,
            // Notification schemas
            crate::notification::model::NotificationType,
            crate::notification::model::EntityType,
            crate::notification::model::NotificationRequest,
            crate::notification::model::Notification,
            crate::notification::model::NotificationsPageResponse,
            crate::notification::model::MarkReadRequest,
            crate::notification::model::UnreadCountResponse,
            crate::notification::model::NotificationErrorResponse,
            // External type schemas
            crate::schema_ext::DateTimeWrapper
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "notifications", description = "Notification ingestion, listing and live delivery")
    )
)]
pub struct ApiDoc;
