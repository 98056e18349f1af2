//! 基础设施层实现。
//!
//! 提供 PostgreSQL 会话存储、Redis 事件扇出/在线状态/限流、本地磁盘对象存储，
//! 实现应用层定义的接口。

pub mod builder;
pub mod migrations;
pub mod redis;
pub mod storage;
pub mod store;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use redis::{RedisEventPublisher, RedisEventRelay, RedisPresenceStore, RedisRateLimiter};
pub use storage::LocalObjectStorage;
pub use store::{create_pg_pool, PgConversationStore};
