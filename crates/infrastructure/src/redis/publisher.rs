//! Redis 事件发布者
//!
//! 每个主题对应一个 Redis 频道 `<prefix><topic>`，载荷是 JSON 编码的事件信封。

use application::{BroadcastError, EventEnvelope, EventPublisher};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::error::RedisResult;

#[derive(Clone)]
pub struct RedisEventPublisher {
    connection: ConnectionManager,
    channel_prefix: String,
}

impl RedisEventPublisher {
    pub fn new(connection: ConnectionManager, channel_prefix: impl Into<String>) -> Self {
        Self {
            connection,
            channel_prefix: channel_prefix.into(),
        }
    }

    pub fn channel_for(&self, envelope: &EventEnvelope) -> String {
        format!("{}{}", self.channel_prefix, envelope.topic.as_str())
    }

    /// 返回收到消息的订阅者数量
    pub async fn publish_envelope(&self, envelope: &EventEnvelope) -> RedisResult<u32> {
        let channel = self.channel_for(envelope);
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.connection.clone();
        let receivers: u32 = conn.publish(&channel, payload).await?;
        debug!(channel = %channel, receivers, event = envelope.event.event_type(), "事件已发布到 Redis");
        Ok(receivers)
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), BroadcastError> {
        self.publish_envelope(&envelope).await?;
        Ok(())
    }
}
