use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, Client};
use tracing::{debug, error, info};

use super::{ChannelError, EventChannel, MessageHandler, Subscription};

/// Redis pub/sub backed channel
#[derive(Debug, Clone)]
pub struct RedisChannel {
    client: Client,
}

impl RedisChannel {
    pub fn new(client: Client) -> Self {
        // Connection validation happens on first use
        Self { client }
    }

    pub fn open(url: &str) -> Result<Self, ChannelError> {
        Ok(Self::new(Client::open(url)?))
    }
}

#[async_trait]
impl EventChannel for RedisChannel {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), ChannelError> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let receivers: i64 = connection.publish(topic, payload).await?;

        debug!("Published to {} ({} live receivers)", topic, receivers);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, ChannelError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        info!("Subscribed to Redis channel: {}", topic);

        let channel_name = topic.to_string();
        let task = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();

            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to get message payload on {}: {}", channel_name, e);
                        continue;
                    }
                };
                handler(payload);
            }

            info!("Redis subscription to {} ended", channel_name);
        });

        Ok(Subscription::new(topic, task))
    }

    async fn ping(&self) -> Result<(), ChannelError> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
