use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use config::RateLimitConfig;
use domain::{TenantId, UserId};

/// 滑动窗口参数：`window` 内最多 `max_events` 次发送
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_events: u32,
}

impl RateLimitPolicy {
    pub fn new(window: Duration, max_events: u32) -> Self {
        Self { window, max_events }
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    pub fn exceeded(&self, retry_after: Duration) -> RateLimitError {
        RateLimitError::Exceeded {
            limit: self.max_events,
            window_ms: self.window_ms(),
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self::new(Duration::from_millis(config.window_ms), config.max_events)
    }
}

/// 限流错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded: at most {limit} messages per {window_ms} ms, retry in {retry_after_ms} ms")]
    Exceeded {
        limit: u32,
        window_ms: u64,
        retry_after_ms: u64,
    },

    #[error("rate limiter unavailable: {0}")]
    Unavailable(String),
}

/// 发送消息前的限流闸门，按 (租户, 用户) 计数
#[async_trait]
pub trait SendRateLimiter: Send + Sync {
    /// 未超限时记录一次发送；超限时不记录并返回 `Exceeded`
    async fn check_and_record(&self, tenant_id: TenantId, user_id: UserId) -> Result<(), RateLimitError>;

    /// 清理已过期的窗口（防止内存泄漏）
    async fn cleanup_expired(&self) -> usize {
        0
    }
}

/// 进程内滑动窗口限流器
pub struct SlidingWindowRateLimiter {
    policy: RateLimitPolicy,
    windows: Mutex<HashMap<(TenantId, UserId), VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn check_at(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: Instant,
    ) -> Result<(), RateLimitError> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let events = windows.entry((tenant_id, user_id)).or_default();

        while let Some(oldest) = events.front() {
            if now.saturating_duration_since(*oldest) >= self.policy.window {
                events.pop_front();
            } else {
                break;
            }
        }

        if events.len() >= self.policy.max_events as usize {
            let oldest = events.front().copied().unwrap_or(now);
            let retry_after = self
                .policy
                .window
                .saturating_sub(now.saturating_duration_since(oldest));
            return Err(self.policy.exceeded(retry_after));
        }

        events.push_back(now);
        Ok(())
    }

    pub fn cleanup_expired_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        let window = self.policy.window;
        windows.retain(|_, events| {
            events
                .back()
                .is_some_and(|latest| now.saturating_duration_since(*latest) < window)
        });
        before - windows.len()
    }

    pub fn tracked_users(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SendRateLimiter for SlidingWindowRateLimiter {
    async fn check_and_record(&self, tenant_id: TenantId, user_id: UserId) -> Result<(), RateLimitError> {
        self.check_at(tenant_id, user_id, Instant::now())
    }

    async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_events: u32) -> SlidingWindowRateLimiter {
        SlidingWindowRateLimiter::new(RateLimitPolicy::new(Duration::from_secs(60), max_events))
    }

    #[test]
    fn rejects_after_max_events_inside_window() {
        let limiter = limiter(3);
        let tenant = TenantId::generate();
        let user = UserId::generate();
        let start = Instant::now();

        for offset in 0..3 {
            assert!(limiter
                .check_at(tenant, user, start + Duration::from_secs(offset))
                .is_ok());
        }

        let err = limiter
            .check_at(tenant, user, start + Duration::from_secs(10))
            .unwrap_err();
        assert_eq!(
            err,
            RateLimitError::Exceeded {
                limit: 3,
                window_ms: 60_000,
                retry_after_ms: 50_000,
            }
        );
    }

    #[test]
    fn window_slides_instead_of_resetting() {
        let limiter = limiter(2);
        let tenant = TenantId::generate();
        let user = UserId::generate();
        let start = Instant::now();

        limiter.check_at(tenant, user, start).unwrap();
        limiter.check_at(tenant, user, start + Duration::from_secs(30)).unwrap();
        assert!(limiter.check_at(tenant, user, start + Duration::from_secs(59)).is_err());
        // 第一条过期后只腾出一个名额
        assert!(limiter.check_at(tenant, user, start + Duration::from_secs(60)).is_ok());
        assert!(limiter.check_at(tenant, user, start + Duration::from_secs(61)).is_err());
    }

    #[test]
    fn counters_are_per_tenant_and_user() {
        let limiter = limiter(1);
        let tenant = TenantId::generate();
        let user = UserId::generate();
        let now = Instant::now();

        limiter.check_at(tenant, user, now).unwrap();
        assert!(limiter.check_at(tenant, user, now).is_err());
        assert!(limiter.check_at(tenant, UserId::generate(), now).is_ok());
        assert!(limiter.check_at(TenantId::generate(), user, now).is_ok());
    }

    #[test]
    fn cleanup_drops_idle_windows() {
        let limiter = limiter(5);
        let start = Instant::now();
        limiter
            .check_at(TenantId::generate(), UserId::generate(), start)
            .unwrap();
        assert_eq!(limiter.tracked_users(), 1);

        assert_eq!(limiter.cleanup_expired_at(start + Duration::from_secs(30)), 0);
        assert_eq!(limiter.cleanup_expired_at(start + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_users(), 0);
    }
}
