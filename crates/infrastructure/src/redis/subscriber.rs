//! Redis 事件转发
//!
//! 按前缀模式订阅所有主题频道，把收到的事件信封注入本进程的事件中心，
//! 由各个 WebSocket 连接按自己的订阅过滤。连接断开后指数退避重连。

use std::sync::Arc;

use application::{EventEnvelope, LocalEventHub};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::error::{RedisError, RedisResult};

const MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Clone)]
pub struct RedisEventRelay {
    client: redis::Client,
    channel_prefix: String,
    hub: Arc<LocalEventHub>,
    reconnect_interval: Duration,
}

impl RedisEventRelay {
    pub fn new(client: redis::Client, channel_prefix: impl Into<String>, hub: Arc<LocalEventHub>) -> Self {
        Self {
            client,
            channel_prefix: channel_prefix.into(),
            hub,
            reconnect_interval: Duration::from_millis(500),
        }
    }

    pub fn pattern(&self) -> String {
        format!("{}*", self.channel_prefix)
    }

    /// 在后台运行，`shutdown` 变为 true 时退出
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut failures: u32 = 0;
            loop {
                tokio::select! {
                    result = self.listen() => match result {
                        Ok(()) => {
                            info!("Redis 订阅流结束，准备重连");
                            failures = 0;
                        }
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            error!(error = %e, failures, "Redis 事件转发出错");
                        }
                    },
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
                let backoff = self.backoff(failures);
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!("Redis 事件转发已停止");
        })
    }

    fn backoff(&self, failures: u32) -> Duration {
        let base = self.reconnect_interval.as_millis() as u64;
        let factor = 2_u64.saturating_pow(failures.min(16));
        Duration::from_millis(base.saturating_mul(factor).min(MAX_BACKOFF_MS))
    }

    async fn listen(&self) -> RedisResult<()> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| RedisError::Connection {
                message: format!("获取 PubSub 连接失败: {e}"),
            })?;
        let pattern = self.pattern();
        pubsub
            .psubscribe(&pattern)
            .await
            .map_err(|e| RedisError::Subscribe {
                message: format!("订阅模式 {pattern} 失败: {e}"),
            })?;
        info!(pattern = %pattern, "已订阅 Redis 事件频道");

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let channel = msg.get_channel_name().to_owned();
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "无法读取 Redis 消息载荷");
                    continue;
                }
            };
            match decode_envelope(&payload) {
                Ok(envelope) => {
                    let receivers = self.hub.inject(envelope);
                    debug!(channel = %channel, receivers, "转发 Redis 事件");
                }
                Err(e) => warn!(channel = %channel, error = %e, "丢弃无法解析的事件"),
            }
        }
        Ok(())
    }
}

pub fn decode_envelope(payload: &str) -> RedisResult<EventEnvelope> {
    serde_json::from_str(payload).map_err(|e| RedisError::Serialization {
        message: e.to_string(),
    })
}
