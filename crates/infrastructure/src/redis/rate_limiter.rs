//! Redis 滑动窗口限流器
//!
//! 每个 (租户, 用户) 一个有序集合，成员是单次发送，分数是发送时间毫秒。
//! 判定与记录在同一个 Lua 脚本里完成，多个实例共享同一窗口。

use std::time::Duration;

use application::{RateLimitError, RateLimitPolicy, SendRateLimiter};
use async_trait::async_trait;
use chrono::Utc;
use domain::{TenantId, UserId};
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::warn;
use uuid::Uuid;

use super::error::RedisResult;

// 返回 {1, 0} 表示放行；{0, retry_ms} 表示超限
const SLIDING_WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
if count >= limit then
  local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
  local retry = window
  if oldest[2] ~= nil then
    retry = window - (now - tonumber(oldest[2]))
  end
  if retry < 0 then retry = 0 end
  return {0, retry}
end
redis.call('ZADD', KEYS[1], now, ARGV[4])
redis.call('PEXPIRE', KEYS[1], window)
return {1, 0}
"#;

#[derive(Clone)]
pub struct RedisRateLimiter {
    connection: ConnectionManager,
    key_prefix: String,
    policy: RateLimitPolicy,
}

impl RedisRateLimiter {
    pub fn new(connection: ConnectionManager, key_prefix: impl Into<String>, policy: RateLimitPolicy) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
            policy,
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    fn window_key(&self, tenant_id: TenantId, user_id: UserId) -> String {
        format!("{}ratelimit:{}:{}", self.key_prefix, tenant_id, user_id)
    }

    async fn run(&self, tenant_id: TenantId, user_id: UserId) -> RedisResult<(bool, u64)> {
        let mut conn = self.connection.clone();
        let (allowed, retry_ms): (i64, i64) = Script::new(SLIDING_WINDOW_SCRIPT)
            .key(self.window_key(tenant_id, user_id))
            .arg(Utc::now().timestamp_millis())
            .arg(self.policy.window_ms())
            .arg(self.policy.max_events)
            .arg(Uuid::new_v4().to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok((allowed == 1, retry_ms.max(0) as u64))
    }
}

#[async_trait]
impl SendRateLimiter for RedisRateLimiter {
    async fn check_and_record(&self, tenant_id: TenantId, user_id: UserId) -> Result<(), RateLimitError> {
        match self.run(tenant_id, user_id).await {
            Ok((true, _)) => Ok(()),
            Ok((false, retry_ms)) => Err(self.policy.exceeded(Duration::from_millis(retry_ms))),
            Err(e) => {
                warn!(tenant_id = %tenant_id, user_id = %user_id, error = %e, "限流检查失败");
                Err(e.into())
            }
        }
    }

    // 窗口键带 PEXPIRE，过期由 Redis 自己回收
}
