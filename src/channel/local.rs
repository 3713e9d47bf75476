use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::{ChannelError, EventChannel, MessageHandler, Subscription};

const TOPIC_CAPACITY: usize = 256;

/// In-process channel built on tokio broadcast queues, one per topic.
///
/// Used when no Redis URL is configured. Only reaches subscribers living in the
/// same process.
#[derive(Debug, Clone, Default)]
pub struct LocalChannel {
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of topics with a sender still registered
    #[cfg(test)]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Number of live subscriptions on `topic`
    #[cfg(test)]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// Receiving end of one subscription. Forgets the topic once its last receiver
/// is gone, whether the task ended or was aborted.
struct TopicReceiver {
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
    topic: String,
    receiver: Option<broadcast::Receiver<String>>,
}

impl TopicReceiver {
    async fn recv(&mut self) -> Result<String, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for TopicReceiver {
    fn drop(&mut self) {
        drop(self.receiver.take());
        if self
            .topics
            .remove_if(&self.topic, |_, sender| sender.receiver_count() == 0)
            .is_some()
        {
            debug!("Last subscriber left {}", self.topic);
        }
    }
}

#[async_trait]
impl EventChannel for LocalChannel {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), ChannelError> {
        let sender = match self.topics.get(topic) {
            Some(sender) => sender.clone(),
            None => {
                debug!("No subscribers on {}, dropping message", topic);
                return Ok(());
            }
        };

        if sender.send(payload.to_string()).is_err() {
            // Every receiver is gone; forget the topic
            self.topics
                .remove_if(topic, |_, sender| sender.receiver_count() == 0);
            debug!("No subscribers on {}, dropping message", topic);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, ChannelError> {
        let receiver = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        let mut receiver = TopicReceiver {
            topics: self.topics.clone(),
            topic: topic.to_string(),
            receiver: Some(receiver),
        };

        let channel_name = topic.to_string();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => handler(payload),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Subscriber on {} lagged, {} messages skipped",
                            channel_name, skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(topic, task))
    }

    async fn ping(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
