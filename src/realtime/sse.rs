use axum::{
    extract::{Extension, Query},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

use crate::notification::controller::notification_error_to_response;
use crate::notification::service::NotificationService;
use crate::realtime::StreamParams;

/// Live notification feed as Server-Sent Events
///
/// Each event's data is one serialized notification. Comment frames keep idle
/// connections open.
#[utoipa::path(
    get,
    path = "/api/notifications/stream",
    tag = "notifications",
    params(StreamParams),
    responses(
        (status = 200, description = "text/event-stream of notifications"),
        (status = 400, description = "Invalid input", body = NotificationErrorResponse),
        (status = 500, description = "Subscription failed", body = NotificationErrorResponse)
    )
)]
pub async fn sse_handler(
    Extension(notification_service): Extension<Arc<NotificationService>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let stream = match notification_service
        .open_stream(params.recipient_user_id)
        .await
    {
        Ok(stream) => stream,
        Err(e) => return notification_error_to_response(e).into_response(),
    };

    info!(
        "User {} connected to notifications stream",
        params.recipient_user_id
    );

    let events = stream.map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(notification_service.stream_keep_alive()))
        .into_response()
}
