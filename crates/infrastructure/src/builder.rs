use std::sync::Arc;

use application::presence::memory::MemoryPresenceStore;
use application::{
    EventPublisher, LocalEventHub, PresenceStore, RateLimitPolicy, SendRateLimiter,
    SlidingWindowRateLimiter,
};
use config::{AppConfig, BroadcastBackend, StateBackend};
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::info;

use crate::{
    migrations::MIGRATOR,
    redis::{RedisError, RedisEventPublisher, RedisEventRelay, RedisPresenceStore, RedisRateLimiter},
    storage::LocalObjectStorage,
    store::{create_pg_pool, PgConversationStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
    #[error("redis.url is required when {0} uses the redis backend")]
    MissingRedisUrl(&'static str),
}

/// 按配置装配好的适配器集合
#[derive(Clone)]
pub struct Infrastructure {
    pub store: Arc<PgConversationStore>,
    /// 本进程 WebSocket 连接订阅的事件中心
    pub hub: Arc<LocalEventHub>,
    pub publisher: Arc<dyn EventPublisher>,
    pub rate_limiter: Arc<dyn SendRateLimiter>,
    pub presence_store: Arc<dyn PresenceStore>,
    pub object_storage: Arc<LocalObjectStorage>,
    /// 使用 Redis 广播时需要由调用方启动
    pub relay: Option<RedisEventRelay>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        info!("数据库迁移完成");
        let store = Arc::new(PgConversationStore::new(pool));

        let redis = connect_redis_if_needed(config).await?;
        let hub = Arc::new(LocalEventHub::new(config.broadcast.capacity));

        let (publisher, relay): (Arc<dyn EventPublisher>, Option<RedisEventRelay>) =
            match (config.broadcast.backend, &redis) {
                (BroadcastBackend::Redis, Some((client, manager))) => (
                    Arc::new(RedisEventPublisher::new(
                        manager.clone(),
                        config.redis.channel_prefix.clone(),
                    )),
                    Some(RedisEventRelay::new(
                        client.clone(),
                        config.redis.channel_prefix.clone(),
                        hub.clone(),
                    )),
                ),
                (BroadcastBackend::Redis, None) => {
                    return Err(InfrastructureError::MissingRedisUrl("broadcast"))
                }
                (BroadcastBackend::Local, _) => (hub.clone(), None),
            };

        let policy = RateLimitPolicy::from(&config.rate_limit);
        let rate_limiter: Arc<dyn SendRateLimiter> = match (config.rate_limit.backend, &redis) {
            (StateBackend::Redis, Some((_, manager))) => Arc::new(RedisRateLimiter::new(
                manager.clone(),
                config.redis.key_prefix.clone(),
                policy,
            )),
            (StateBackend::Redis, None) => return Err(InfrastructureError::MissingRedisUrl("rate_limit")),
            (StateBackend::Memory, _) => Arc::new(SlidingWindowRateLimiter::new(policy)),
        };

        let presence_store: Arc<dyn PresenceStore> = match (config.presence.backend, &redis) {
            (StateBackend::Redis, Some((_, manager))) => Arc::new(RedisPresenceStore::new(
                manager.clone(),
                config.redis.key_prefix.clone(),
            )),
            (StateBackend::Redis, None) => return Err(InfrastructureError::MissingRedisUrl("presence")),
            (StateBackend::Memory, _) => Arc::new(MemoryPresenceStore::new()),
        };

        let object_storage = Arc::new(LocalObjectStorage::new(
            &config.uploads.dir,
            config.uploads.public_base_url.clone(),
        ));

        info!(
            broadcast = ?config.broadcast.backend,
            rate_limit = ?config.rate_limit.backend,
            presence = ?config.presence.backend,
            "基础设施已就绪"
        );

        Ok(Self {
            store,
            hub,
            publisher,
            rate_limiter,
            presence_store,
            object_storage,
            relay,
        })
    }
}

async fn connect_redis_if_needed(
    config: &AppConfig,
) -> Result<Option<(redis::Client, ConnectionManager)>, InfrastructureError> {
    let needed = config.broadcast.backend == BroadcastBackend::Redis
        || config.rate_limit.backend == StateBackend::Redis
        || config.presence.backend == StateBackend::Redis;
    match (&config.redis.url, needed) {
        (Some(url), true) => Ok(Some(crate::redis::connect(url).await?)),
        _ => Ok(None),
    }
}
