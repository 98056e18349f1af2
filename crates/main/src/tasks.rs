//! 后台周期任务：在线状态过期清理、限流窗口回收、消息归档

use std::{sync::Arc, time::Duration};

use application::{BroadcastRouter, ChatEvent, ChatService, PresenceTracker, SendRateLimiter};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info};

/// 按固定间隔运行 `job`，直到收到停机信号
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 第一次 tick 立即返回
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => job().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(task = name, "后台任务已停止");
    })
}

pub fn spawn_presence_sweeper(
    presence: Arc<PresenceTracker>,
    broadcaster: BroadcastRouter,
    interval_secs: u64,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic(
        "presence_sweeper",
        Duration::from_secs(interval_secs.max(1)),
        shutdown,
        move || {
            let presence = presence.clone();
            let broadcaster = broadcaster.clone();
            async move {
                match presence.sweep().await {
                    Ok(evicted) => {
                        for (tenant_id, payload) in evicted {
                            broadcaster
                                .emit_to_tenant(tenant_id, ChatEvent::PresenceUpdated(payload))
                                .await;
                        }
                    }
                    Err(err) => error!(error = %err, "在线状态清理失败"),
                }
            }
        },
    )
}

pub fn spawn_rate_limit_cleanup(
    rate_limiter: Arc<dyn SendRateLimiter>,
    window_ms: u64,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic(
        "rate_limit_cleanup",
        Duration::from_millis(window_ms.max(1000)),
        shutdown,
        move || {
            let rate_limiter = rate_limiter.clone();
            async move {
                let removed = rate_limiter.cleanup_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "回收过期限流窗口");
                }
            }
        },
    )
}

pub fn spawn_retention_sweeper(
    chat_service: Arc<ChatService>,
    interval_secs: u64,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic(
        "retention_sweeper",
        Duration::from_secs(interval_secs.max(1)),
        shutdown,
        move || {
            let chat_service = chat_service.clone();
            async move {
                let Some(cutoff) = chat_service.retention_cutoff() else {
                    return;
                };
                match chat_service.archive_expired(cutoff).await {
                    Ok(0) => {}
                    Ok(archived) => info!(archived, "过期消息已归档"),
                    Err(err) => error!(error = %err, "消息归档失败"),
                }
            }
        },
    )
}
