pub mod local;
pub mod redis;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub use self::local::LocalChannel;
pub use self::redis::RedisChannel;

/// Prefix of every per-recipient topic
pub const NOTIFICATION_TOPIC_PREFIX: &str = "notifications";

/// Callback invoked once per message published on a subscribed topic
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

// Error type for channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Redis error: {0}")]
    RedisError(#[from] ::redis::RedisError),

    #[error("Subscription to {0} closed")]
    Closed(String),
}

/// Topic a recipient's notifications are published on
pub fn notification_topic(recipient_user_id: i64) -> String {
    format!("{}:{}", NOTIFICATION_TOPIC_PREFIX, recipient_user_id)
}

/// Fire-and-forget publish/subscribe transport.
///
/// Publishing to a topic nobody listens on is a silent no-op and nothing is kept
/// for subscribers that join later.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), ChannelError>;

    /// Register `handler` for every message on `topic`. The handler runs on its own
    /// task; dropping the returned [`Subscription`] unsubscribes.
    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, ChannelError>;

    async fn ping(&self) -> Result<(), ChannelError>;

    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;
}

/// Live subscription. Aborts its delivery task when dropped.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            topic: topic.into(),
            task,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_topic_format() {
        assert_eq!(notification_topic(42), "notifications:42");
    }

    #[tokio::test]
    async fn test_dropping_subscription_aborts_task() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            let _tx = tx;
            futures::future::pending::<()>().await;
        });
        let subscription = Subscription::new("notifications:1", task);
        assert_eq!(subscription.topic(), "notifications:1");

        drop(subscription);
        // The task's sender goes away with it
        let closed = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await;
        assert_eq!(closed.unwrap(), None);
    }
}
