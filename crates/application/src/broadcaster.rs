//! 广播路由
//!
//! 按主题（频道、私信、租户、个人）发布事件。订阅授权在订阅时完成，
//! 这里不再逐条校验权限。发布在持久化之后进行，失败只记日志，不影响调用方。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChannelId, ConversationTarget, DmThreadId, TenantId, Timestamp, Topic, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::events::ChatEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub topic: Topic,
    pub event: ChatEvent,
    pub emitted_at: Timestamp,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 事件发布通道：进程内 hub 或跨进程的 pub/sub
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), BroadcastError>;
}

#[derive(Clone)]
pub struct BroadcastRouter {
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl BroadcastRouter {
    pub fn new(publisher: Arc<dyn EventPublisher>, clock: Arc<dyn Clock>) -> Self {
        Self { publisher, clock }
    }

    pub async fn emit_to_chat_channel(&self, channel_id: ChannelId, event: ChatEvent) {
        self.emit(Topic::channel(channel_id), event).await;
    }

    pub async fn emit_to_chat_dm(&self, dm_thread_id: DmThreadId, event: ChatEvent) {
        self.emit(Topic::dm(dm_thread_id), event).await;
    }

    pub async fn emit_to_tenant(&self, tenant_id: TenantId, event: ChatEvent) {
        self.emit(Topic::tenant(tenant_id), event).await;
    }

    pub async fn emit_to_user(&self, tenant_id: TenantId, user_id: UserId, event: ChatEvent) {
        self.emit(Topic::user(tenant_id, user_id), event).await;
    }

    pub async fn emit_to_conversation(&self, target: ConversationTarget, event: ChatEvent) {
        match target {
            ConversationTarget::Channel(id) => self.emit_to_chat_channel(id, event).await,
            ConversationTarget::Dm(id) => self.emit_to_chat_dm(id, event).await,
        }
    }

    async fn emit(&self, topic: Topic, event: ChatEvent) {
        let event_type = event.event_type();
        let envelope = EventEnvelope {
            topic: topic.clone(),
            event,
            emitted_at: self.clock.now(),
        };
        if let Err(err) = self.publisher.publish(envelope).await {
            tracing::warn!(
                topic = %topic,
                event_type,
                error = %err,
                "事件广播失败，客户端将在下次拉取时补齐"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::dto::PresencePayload;

    #[tokio::test]
    async fn publish_failures_are_swallowed() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_| Err(BroadcastError::failed("socket layer down")));

        let router = BroadcastRouter::new(Arc::new(publisher), Arc::new(SystemClock));
        let tenant = TenantId::generate();
        router
            .emit_to_tenant(tenant, ChatEvent::PresenceUpdated(PresencePayload::offline(UserId::generate())))
            .await;
    }

    #[tokio::test]
    async fn conversation_targets_map_to_their_topics() {
        let dm = DmThreadId::generate();
        let expected = Topic::dm(dm);
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(move |envelope| envelope.topic == expected)
            .times(1)
            .returning(|_| Ok(()));

        let router = BroadcastRouter::new(Arc::new(publisher), Arc::new(SystemClock));
        router
            .emit_to_conversation(
                ConversationTarget::Dm(dm),
                ChatEvent::PresenceUpdated(PresencePayload::offline(UserId::generate())),
            )
            .await;
    }
}
