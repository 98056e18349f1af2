// 进程内事件 hub
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use domain::Topic;
use tokio::sync::broadcast;

use crate::broadcaster::{BroadcastError, EventEnvelope, EventPublisher};

#[derive(Clone)]
pub struct LocalEventHub {
    sender: broadcast::Sender<Arc<EventEnvelope>>,
}

impl LocalEventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> TopicSubscription {
        TopicSubscription::new(self.sender.subscribe())
    }

    /// 投递到本进程的订阅者，返回收到事件的订阅者数量
    pub fn inject(&self, envelope: EventEnvelope) -> usize {
        // 没有订阅者时 send 返回错误，这不是故障
        self.sender.send(Arc::new(envelope)).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalEventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for LocalEventHub {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), BroadcastError> {
        self.inject(envelope);
        Ok(())
    }
}

/// 单个连接的订阅，只放行已订阅主题的事件
pub struct TopicSubscription {
    receiver: broadcast::Receiver<Arc<EventEnvelope>>,
    topics: HashSet<Topic>,
}

impl TopicSubscription {
    fn new(receiver: broadcast::Receiver<Arc<EventEnvelope>>) -> Self {
        Self {
            receiver,
            topics: HashSet::new(),
        }
    }

    pub fn add_topic(&mut self, topic: Topic) -> bool {
        self.topics.insert(topic)
    }

    pub fn remove_topic(&mut self, topic: &Topic) -> bool {
        self.topics.remove(topic)
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter()
    }

    /// hub 关闭时返回 `None`；落后被丢弃的事件只记日志，客户端靠拉取补齐
    pub async fn recv(&mut self) -> Option<Arc<EventEnvelope>> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if self.topics.contains(&envelope.topic) {
                        return Some(envelope);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "订阅者处理过慢，丢弃部分事件");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
