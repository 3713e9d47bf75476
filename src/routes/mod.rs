pub mod health;
pub mod notifications;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api_doc::ApiDoc;
use crate::notification::service::NotificationService;

/// Build the full HTTP application
pub fn app(notification_service: Arc<NotificationService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // API documentation
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Health routes
        .merge(health::routes(notification_service.clone()))
        // Notification routes
        .merge(notifications::routes(notification_service))
        // Add welcome route
        .route(
            "/",
            get(|| async { "Welcome to the Realtime Notifications API" }),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
