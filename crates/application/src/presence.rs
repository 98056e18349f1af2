//! 在线状态跟踪
//!
//! 记录按 (租户, 用户) 存放在可替换的 [`PresenceStore`] 中：单实例用内存实现，
//! 多实例部署换成共享存储。状态由最近一次心跳推导，过期记录在读取或定期清扫时逐出。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use config::PresenceConfig;
use domain::{DomainError, TenantId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::ApplicationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub connections: u32,
    pub last_heartbeat_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub connections: u32,
    pub last_seen_at: Option<Timestamp>,
}

impl PresencePayload {
    pub fn offline(user_id: UserId) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Offline,
            connections: 0,
            last_seen_at: None,
        }
    }
}

/// 在线状态存储。每个方法对单个用户的记录是原子的。
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<PresenceRecord>, ApplicationError>;

    /// 连接数加一并刷新心跳，不存在时创建
    async fn record_connect(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<PresenceRecord, ApplicationError>;

    /// 刷新心跳，不存在时以零连接创建
    async fn record_heartbeat(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<PresenceRecord, ApplicationError>;

    /// 连接数减一，降到零时逐出并返回 `None`
    async fn record_disconnect(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<PresenceRecord>, ApplicationError>;

    async fn evict(&self, tenant_id: TenantId, user_id: UserId) -> Result<(), ApplicationError>;

    async fn list_tenant(&self, tenant_id: TenantId) -> Result<Vec<PresenceRecord>, ApplicationError>;

    /// 逐出最近心跳早于 `cutoff` 的所有记录
    async fn evict_stale(&self, cutoff: Timestamp) -> Result<Vec<PresenceRecord>, ApplicationError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PresencePolicy {
    pub online_window: Duration,
    pub expiry: Duration,
    pub max_query_ids: usize,
}

impl From<&PresenceConfig> for PresencePolicy {
    fn from(config: &PresenceConfig) -> Self {
        Self {
            online_window: Duration::seconds(config.online_window_secs as i64),
            expiry: Duration::seconds(config.expiry_secs as i64),
            max_query_ids: config.max_query_ids,
        }
    }
}

pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    policy: PresencePolicy,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>, clock: Arc<dyn Clock>, policy: PresencePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> PresencePolicy {
        self.policy
    }

    pub async fn connect(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<PresencePayload, ApplicationError> {
        let now = self.clock.now();
        let record = self.store.record_connect(tenant_id, user_id, now).await?;
        tracing::debug!(tenant_id = %tenant_id, user_id = %user_id, connections = record.connections, "用户上线");
        Ok(self.to_presence_payload(&record, now))
    }

    pub async fn heartbeat(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<PresencePayload, ApplicationError> {
        let now = self.clock.now();
        let record = self.store.record_heartbeat(tenant_id, user_id, now).await?;
        Ok(self.to_presence_payload(&record, now))
    }

    pub async fn disconnect(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<PresencePayload, ApplicationError> {
        let now = self.clock.now();
        match self.store.record_disconnect(tenant_id, user_id).await? {
            Some(record) => Ok(self.to_presence_payload(&record, now)),
            None => {
                tracing::debug!(tenant_id = %tenant_id, user_id = %user_id, "用户最后一个连接断开");
                Ok(PresencePayload::offline(user_id))
            }
        }
    }

    pub async fn get_presence_for_users(
        &self,
        tenant_id: TenantId,
        user_ids: &[UserId],
    ) -> Result<Vec<PresencePayload>, ApplicationError> {
        if user_ids.len() > self.policy.max_query_ids {
            return Err(DomainError::invalid_argument(
                "user_ids",
                format!("at most {} ids per query", self.policy.max_query_ids),
            )
            .into());
        }

        let now = self.clock.now();
        let mut payloads = Vec::with_capacity(user_ids.len());
        for &user_id in user_ids {
            let payload = match self.store.get(tenant_id, user_id).await? {
                Some(record) if self.is_expired(&record, now) => {
                    self.store.evict(tenant_id, user_id).await?;
                    PresencePayload::offline(user_id)
                }
                Some(record) => self.to_presence_payload(&record, now),
                None => PresencePayload::offline(user_id),
            };
            payloads.push(payload);
        }
        Ok(payloads)
    }

    /// 租户内所有未过期的在线记录
    pub async fn get_all_presence_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<PresencePayload>, ApplicationError> {
        let now = self.clock.now();
        let mut payloads = Vec::new();
        for record in self.store.list_tenant(tenant_id).await? {
            if self.is_expired(&record, now) {
                self.store.evict(tenant_id, record.user_id).await?;
                continue;
            }
            payloads.push(self.to_presence_payload(&record, now));
        }
        Ok(payloads)
    }

    pub fn to_presence_payload(&self, record: &PresenceRecord, now: Timestamp) -> PresencePayload {
        let idle = now - record.last_heartbeat_at;
        let status = if idle <= self.policy.online_window {
            PresenceStatus::Online
        } else if idle <= self.policy.expiry {
            PresenceStatus::Away
        } else {
            PresenceStatus::Offline
        };
        PresencePayload {
            user_id: record.user_id,
            status,
            connections: record.connections,
            last_seen_at: Some(record.last_heartbeat_at),
        }
    }

    /// 逐出过期记录，返回被逐出的 (租户, 离线载荷)，供调用方广播
    pub async fn sweep(&self) -> Result<Vec<(TenantId, PresencePayload)>, ApplicationError> {
        let cutoff = self.clock.now() - self.policy.expiry;
        let evicted = self.store.evict_stale(cutoff).await?;
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "清理过期在线状态");
        }
        Ok(evicted
            .into_iter()
            .map(|record| (record.tenant_id, PresencePayload::offline(record.user_id)))
            .collect())
    }

    fn is_expired(&self, record: &PresenceRecord, now: Timestamp) -> bool {
        now - record.last_heartbeat_at > self.policy.expiry
    }
}

/// 内存实现的在线状态存储
pub mod memory {
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};

    use super::*;

    #[derive(Default)]
    pub struct MemoryPresenceStore {
        records: Mutex<HashMap<(TenantId, UserId), PresenceRecord>>,
    }

    impl MemoryPresenceStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn with_records<R>(
            &self,
            f: impl FnOnce(&mut HashMap<(TenantId, UserId), PresenceRecord>) -> R,
        ) -> R {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut records)
        }
    }

    #[async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn get(
            &self,
            tenant_id: TenantId,
            user_id: UserId,
        ) -> Result<Option<PresenceRecord>, ApplicationError> {
            Ok(self.with_records(|records| records.get(&(tenant_id, user_id)).cloned()))
        }

        async fn record_connect(
            &self,
            tenant_id: TenantId,
            user_id: UserId,
            now: Timestamp,
        ) -> Result<PresenceRecord, ApplicationError> {
            Ok(self.with_records(|records| {
                let record = records
                    .entry((tenant_id, user_id))
                    .or_insert_with(|| PresenceRecord {
                        tenant_id,
                        user_id,
                        connections: 0,
                        last_heartbeat_at: now,
                    });
                record.connections += 1;
                record.last_heartbeat_at = now;
                record.clone()
            }))
        }

        async fn record_heartbeat(
            &self,
            tenant_id: TenantId,
            user_id: UserId,
            now: Timestamp,
        ) -> Result<PresenceRecord, ApplicationError> {
            Ok(self.with_records(|records| {
                let record = records
                    .entry((tenant_id, user_id))
                    .or_insert_with(|| PresenceRecord {
                        tenant_id,
                        user_id,
                        connections: 0,
                        last_heartbeat_at: now,
                    });
                record.last_heartbeat_at = now;
                record.clone()
            }))
        }

        async fn record_disconnect(
            &self,
            tenant_id: TenantId,
            user_id: UserId,
        ) -> Result<Option<PresenceRecord>, ApplicationError> {
            Ok(self.with_records(|records| {
                let key = (tenant_id, user_id);
                let remaining = records.get_mut(&key).map(|record| {
                    record.connections = record.connections.saturating_sub(1);
                    record.connections
                });
                match remaining {
                    Some(0) | None => {
                        records.remove(&key);
                        None
                    }
                    Some(_) => records.get(&key).cloned(),
                }
            }))
        }

        async fn evict(&self, tenant_id: TenantId, user_id: UserId) -> Result<(), ApplicationError> {
            self.with_records(|records| records.remove(&(tenant_id, user_id)));
            Ok(())
        }

        async fn list_tenant(&self, tenant_id: TenantId) -> Result<Vec<PresenceRecord>, ApplicationError> {
            Ok(self.with_records(|records| {
                records
                    .values()
                    .filter(|record| record.tenant_id == tenant_id)
                    .cloned()
                    .collect()
            }))
        }

        async fn evict_stale(&self, cutoff: Timestamp) -> Result<Vec<PresenceRecord>, ApplicationError> {
            Ok(self.with_records(|records| {
                let stale: Vec<(TenantId, UserId)> = records
                    .iter()
                    .filter(|(_, record)| record.last_heartbeat_at < cutoff)
                    .map(|(key, _)| *key)
                    .collect();
                stale
                    .into_iter()
                    .filter_map(|key| records.remove(&key))
                    .collect()
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryPresenceStore;
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (PresenceTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let tracker = PresenceTracker::new(
            Arc::new(MemoryPresenceStore::new()),
            clock.clone(),
            PresencePolicy {
                online_window: Duration::seconds(60),
                expiry: Duration::seconds(300),
                max_query_ids: 3,
            },
        );
        (tracker, clock)
    }

    #[tokio::test]
    async fn status_decays_from_online_to_away_to_offline() {
        let (tracker, clock) = tracker();
        let tenant = TenantId::generate();
        let user = UserId::generate();

        let payload = tracker.connect(tenant, user).await.unwrap();
        assert_eq!(payload.status, PresenceStatus::Online);

        clock.advance(Duration::seconds(120));
        let current = tracker.get_presence_for_users(tenant, &[user]).await.unwrap();
        assert_eq!(current[0].status, PresenceStatus::Away);

        clock.advance(Duration::seconds(200));
        let current = tracker.get_presence_for_users(tenant, &[user]).await.unwrap();
        assert_eq!(current[0].status, PresenceStatus::Offline);
        assert!(tracker.get_all_presence_for_tenant(tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_keeps_user_online() {
        let (tracker, clock) = tracker();
        let tenant = TenantId::generate();
        let user = UserId::generate();

        tracker.connect(tenant, user).await.unwrap();
        clock.advance(Duration::seconds(250));
        tracker.heartbeat(tenant, user).await.unwrap();
        clock.advance(Duration::seconds(30));

        let all = tracker.get_all_presence_for_tenant(tenant).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, PresenceStatus::Online);
    }

    #[tokio::test]
    async fn last_disconnect_goes_offline() {
        let (tracker, _clock) = tracker();
        let tenant = TenantId::generate();
        let user = UserId::generate();

        tracker.connect(tenant, user).await.unwrap();
        tracker.connect(tenant, user).await.unwrap();
        let after_one = tracker.disconnect(tenant, user).await.unwrap();
        assert_eq!(after_one.status, PresenceStatus::Online);
        assert_eq!(after_one.connections, 1);

        let after_two = tracker.disconnect(tenant, user).await.unwrap();
        assert_eq!(after_two.status, PresenceStatus::Offline);
    }

    #[tokio::test]
    async fn sweep_evicts_crashed_connections() {
        let (tracker, clock) = tracker();
        let tenant = TenantId::generate();
        let user = UserId::generate();

        tracker.connect(tenant, user).await.unwrap();
        clock.advance(Duration::seconds(301));
        let evicted = tracker.sweep().await.unwrap();
        assert_eq!(evicted, vec![(tenant, PresencePayload::offline(user))]);
    }

    #[tokio::test]
    async fn presence_is_tenant_scoped_and_query_size_is_capped() {
        let (tracker, _clock) = tracker();
        let tenant = TenantId::generate();
        let user = UserId::generate();
        tracker.connect(tenant, user).await.unwrap();

        let other_tenant = tracker
            .get_presence_for_users(TenantId::generate(), &[user])
            .await
            .unwrap();
        assert_eq!(other_tenant[0].status, PresenceStatus::Offline);

        let too_many: Vec<UserId> = (0..4).map(|_| UserId::generate()).collect();
        let err = tracker.get_presence_for_users(tenant, &too_many).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::InvalidArgument { .. })));
    }
}
