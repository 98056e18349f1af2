//! Redis 适配器
//!
//! 多实例部署时的事件扇出（发布 + 模式订阅转发）、在线状态存储和发送限流窗口。

pub mod error;
pub mod presence;
pub mod publisher;
pub mod rate_limiter;
pub mod subscriber;

pub use error::{RedisError, RedisResult};
pub use presence::RedisPresenceStore;
pub use publisher::RedisEventPublisher;
pub use rate_limiter::RedisRateLimiter;
pub use subscriber::RedisEventRelay;

use redis::aio::ConnectionManager;

/// 打开客户端并建立自动重连的连接
pub async fn connect(url: &str) -> RedisResult<(redis::Client, ConnectionManager)> {
    let client = redis::Client::open(url).map_err(|e| RedisError::Config {
        message: format!("创建 Redis 客户端失败: {e}"),
    })?;
    let manager = ConnectionManager::new(client.clone())
        .await
        .map_err(|e| RedisError::Connection {
            message: format!("连接 Redis 失败: {e}"),
        })?;
    Ok((client, manager))
}
