use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time};
use tracing::{debug, error, info, warn};

use crate::notification::service::NotificationService;
use crate::realtime::StreamParams;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Handle an invalid socket connection
async fn handle_invalid_socket(mut socket: WebSocket, error_message: String) {
    // Send error message to client
    let body = serde_json::json!({ "error": error_message }).to_string();
    if let Err(e) = socket.send(Message::Text(body)).await {
        error!("Error sending error message on WS: {}", e);
    }

    // Close the connection
    let _ = socket.close().await;
}

/// Handle a valid WebSocket connection
async fn handle_valid_connection(
    socket: WebSocket,
    recipient_user_id: i64,
    notification_service: Arc<NotificationService>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(100);

    // Live notifications become text frames
    let tx_stream = tx.clone();
    let stream_task = tokio::spawn(async move {
        let tx_close = tx_stream.clone();
        let sink = futures::sink::unfold(tx_stream, |tx, payload: String| async move {
            tx.send(Message::Text(payload)).await.map(|_| tx)
        });

        // The writer task dropping its receiver means the client is gone
        if let Err(e) = notification_service
            .stream_for(recipient_user_id, sink, tx_close.closed())
            .await
        {
            warn!(
                "Live stream for user {} ended: {}",
                recipient_user_id, e
            );
            let _ = tx_close.send(Message::Close(None)).await;
        }
    });

    // Forward messages from channel to WebSocket
    let forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = ws_sender.send(message).await {
                error!("Error forwarding message to WebSocket: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Heartbeat task
    let tx_heartbeat = tx;
    let heartbeat_task = tokio::spawn(async move {
        let mut interval = time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = tx_heartbeat.send(Message::Ping(vec![])).await {
                debug!("Stopping heartbeat: {}", e);
                break;
            }
        }
    });

    // Process incoming WebSocket messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                info!("WebSocket closed by client");
                break;
            }
            Ok(Message::Pong(_)) => {
                // Client responded to our ping
                debug!("Received pong from client");
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Clean up; aborting the stream task drops its subscription
    stream_task.abort();
    forward_task.abort();
    heartbeat_task.abort();

    info!(
        "WebSocket connection closed for user: {}",
        recipient_user_id
    );
}

/// Live notification feed over WebSocket
///
/// Every notification arrives as one text frame holding its JSON.
#[utoipa::path(
    get,
    path = "/api/notifications/ws",
    tag = "notifications",
    params(StreamParams),
    responses(
        (status = 101, description = "Switching to the WebSocket protocol"),
        (status = 400, description = "Missing or malformed recipient_user_id")
    )
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    Extension(notification_service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    let recipient_user_id = params.recipient_user_id;

    if recipient_user_id <= 0 {
        let error_message = "recipient_user_id must be a positive id".to_string();
        return ws.on_upgrade(move |socket| async move {
            handle_invalid_socket(socket, error_message).await;
        });
    }

    // Valid connection, upgrade and handle
    info!(
        "User {} connected to notifications WebSocket",
        recipient_user_id
    );
    ws.on_upgrade(move |socket| async move {
        handle_valid_connection(socket, recipient_user_id, notification_service).await;
    })
}
