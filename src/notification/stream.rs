use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::channel::{notification_topic, ChannelError, EventChannel, MessageHandler, Subscription};

/// Payloads buffered per live connection before new ones are dropped
const STREAM_BUFFER: usize = 100;

/// Live feed of serialized notifications for one recipient.
///
/// Holds the channel subscription, so dropping the stream unsubscribes. Ends when
/// the underlying subscription ends.
#[derive(Debug)]
pub struct NotificationStream {
    subscription: Subscription,
    receiver: mpsc::Receiver<String>,
}

impl NotificationStream {
    pub async fn open(
        channel: &dyn EventChannel,
        recipient_user_id: i64,
    ) -> Result<Self, ChannelError> {
        let topic = notification_topic(recipient_user_id);
        let (tx, receiver) = mpsc::channel(STREAM_BUFFER);

        let handler_topic = topic.clone();
        let handler: MessageHandler = Arc::new(move |payload: String| {
            match tx.try_send(payload) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Stream buffer for {} is full, dropping message", handler_topic);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Stream for {} already closed", handler_topic);
                }
            }
        });

        let subscription = channel.subscribe(&topic, handler).await?;
        Ok(Self {
            subscription,
            receiver,
        })
    }

    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }
}

impl Stream for NotificationStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
