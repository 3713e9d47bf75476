use futures::{pin_mut, Future, Sink, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};

use crate::channel::{notification_topic, ChannelError, EventChannel};
use crate::config::NotificationConfig;
use crate::notification::aggregator::{AggregationEngine, Clock};
use crate::notification::model::{Notification, NotificationError, NotificationRequest};
use crate::notification::store::NotificationStore;
use crate::notification::stream::NotificationStream;

/// Status of one dependency as seen by the readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyStatus {
    pub backend: &'static str,
    pub error: Option<String>,
}

impl DependencyStatus {
    pub fn is_up(&self) -> bool {
        self.error.is_none()
    }
}

/// Ties the aggregation engine, the store and the event channel together.
///
/// Persistence and push are separate: once the store accepted an event, a failed
/// publish is logged and the ingest still succeeds.
pub struct NotificationService {
    engine: AggregationEngine,
    store: Arc<dyn NotificationStore>,
    channel: Arc<dyn EventChannel>,
    config: NotificationConfig,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        channel: Arc<dyn EventChannel>,
        clock: Arc<dyn Clock>,
        config: NotificationConfig,
    ) -> Self {
        let engine = AggregationEngine::new(store.clone(), clock, config.aggregation_window);
        info!(
            "Notification service using {} store and {} channel, {} minute window",
            store.backend(),
            channel.backend(),
            config.aggregation_window.num_minutes()
        );

        Self {
            engine,
            store,
            channel,
            config,
        }
    }

    pub fn stream_keep_alive(&self) -> StdDuration {
        self.config.stream_keep_alive
    }

    /// Validate, aggregate and persist one event, then push the result to live
    /// subscribers of the recipient.
    pub async fn ingest_event(
        &self,
        request: NotificationRequest,
    ) -> Result<Notification, NotificationError> {
        request.validate()?;

        let notification = self.engine.ingest(&request).await.map_err(|e| {
            error!(
                "Failed to ingest {} for user {}: {}",
                request.notification_type, request.recipient_user_id, e
            );
            e
        })?;

        self.publish(&notification).await;
        Ok(notification)
    }

    async fn publish(&self, notification: &Notification) {
        let payload = match serde_json::to_string(notification) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    "Failed to serialize notification {:?}: {}",
                    notification.id(),
                    e
                );
                return;
            }
        };

        let topic = notification_topic(notification.recipient_user_id());
        if let Err(e) = self.channel.publish(&topic, &payload).await {
            warn!(
                "Failed to publish notification {:?} to {}: {}",
                notification.id(),
                topic,
                e
            );
        }
    }

    /// Turn raw `limit` / `page` query values into `(limit, offset)`.
    ///
    /// Missing, unparsable or non-positive limits fall back to the default and are
    /// clamped to the maximum; pages below 1 become 1 and pages whose offset would
    /// not fit in an `i64` are clamped to the last representable one.
    pub fn page_bounds(&self, limit: Option<&str>, page: Option<&str>) -> (i64, i64) {
        let limit = limit
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit);

        let page = page
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(self.config.default_page)
            .clamp(1, i64::MAX / limit);

        (limit, (page - 1) * limit)
    }

    /// One page of the recipient's notifications, unread first, and whether more
    /// unread notifications exist past it.
    pub async fn fetch_page(
        &self,
        recipient_user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Notification>, bool), NotificationError> {
        validate_recipient(recipient_user_id)?;
        if limit <= 0 || offset < 0 {
            return Err(NotificationError::ValidationError(
                "limit must be positive and offset non-negative".to_string(),
            ));
        }

        let (notifications, unread) = tokio::try_join!(
            self.store.list_for_user(recipient_user_id, limit, offset),
            self.store.count_unread(recipient_user_id),
        )?;

        let has_more = offset
            .checked_add(limit)
            .map_or(false, |page_end| unread > page_end);
        Ok((notifications, has_more))
    }

    pub async fn mark_read(&self, ids: &[i64]) -> Result<u64, NotificationError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let changed = self.store.mark_read(ids).await?;
        info!("Marked {} notifications as read", changed);
        Ok(changed)
    }

    /// `(unread, total)` notification counts for the recipient
    pub async fn counts(&self, recipient_user_id: i64) -> Result<(i64, i64), NotificationError> {
        validate_recipient(recipient_user_id)?;
        tokio::try_join!(
            self.store.count_unread(recipient_user_id),
            self.store.count_for_user(recipient_user_id),
        )
    }

    /// Subscribe to the recipient's live feed
    pub async fn open_stream(
        &self,
        recipient_user_id: i64,
    ) -> Result<NotificationStream, NotificationError> {
        validate_recipient(recipient_user_id)?;

        let stream = NotificationStream::open(self.channel.as_ref(), recipient_user_id).await?;
        info!("Opened live stream on {}", stream.topic());
        Ok(stream)
    }

    /// Forward every live payload for the recipient into `sink`.
    ///
    /// Returns `Ok` once the sink stops accepting items or `closed` resolves,
    /// whichever comes first, and a `DeliveryError` if the subscription itself ends.
    /// `closed` lets a consumer that went away end the loop without waiting for the
    /// next payload. Dropping the future unsubscribes.
    pub async fn stream_for<S, C>(
        &self,
        recipient_user_id: i64,
        sink: S,
        closed: C,
    ) -> Result<(), NotificationError>
    where
        S: Sink<String>,
        C: Future<Output = ()>,
    {
        let mut stream = self.open_stream(recipient_user_id).await?;
        let topic = stream.topic().to_string();
        pin_mut!(sink);

        let forward = async {
            while let Some(payload) = stream.next().await {
                if sink.send(payload).await.is_err() {
                    info!("Consumer of {} went away", topic);
                    return Ok(());
                }
            }
            Err(NotificationError::from(ChannelError::Closed(topic.clone())))
        };

        tokio::select! {
            result = forward => result,
            _ = closed => {
                info!("Consumer of {} closed", topic);
                Ok(())
            }
        }
    }

    pub async fn store_status(&self) -> DependencyStatus {
        DependencyStatus {
            backend: self.store.backend(),
            error: self.store.ping().await.err().map(|e| e.to_string()),
        }
    }

    pub async fn channel_status(&self) -> DependencyStatus {
        DependencyStatus {
            backend: self.channel.backend(),
            error: self.channel.ping().await.err().map(|e| e.to_string()),
        }
    }
}

fn validate_recipient(recipient_user_id: i64) -> Result<(), NotificationError> {
    if recipient_user_id <= 0 {
        return Err(NotificationError::ValidationError(
            "recipient_user_id must be a positive id".to_string(),
        ));
    }
    Ok(())
}
