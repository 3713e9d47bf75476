use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;

use crate::notification::controller::{get_notifications, mark_read, send_notification, unread_count};
use crate::notification::service::NotificationService;
use crate::realtime::{sse::sse_handler, websocket::ws_handler};

/// Create a router for notifications
pub fn routes(notification_service: Arc<NotificationService>) -> Router {
    Router::new()
        .route(
            "/api/notifications",
            post(send_notification).get(get_notifications),
        )
        .route("/api/notifications/mark_read", post(mark_read))
        .route("/api/notifications/unread_count", get(unread_count))
        .route("/api/notifications/stream", get(sse_handler))
        .route("/api/notifications/ws", get(ws_handler))
        .layer(Extension(notification_service))
}
