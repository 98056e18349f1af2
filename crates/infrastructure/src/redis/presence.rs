//! Redis 在线状态存储
//!
//! 每个用户一个哈希 `<prefix>presence:<tenant>:<user>`（连接数、最近心跳毫秒），
//! 租户集合 `<prefix>presence:tenant:<tenant>` 保存在线用户，
//! 全局有序集合 `<prefix>presence:index` 以心跳时间为分数，供过期清扫使用。
//! 所有修改都通过 Lua 脚本原子执行，多个实例可以共享。

use application::{ApplicationError, PresenceRecord, PresenceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{TenantId, Timestamp, UserId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use super::error::{RedisError, RedisResult};

const CONNECT_SCRIPT: &str = r#"
local connections = redis.call('HINCRBY', KEYS[1], 'connections', 1)
redis.call('HSET', KEYS[1], 'heartbeat_ms', ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[1], ARGV[3])
return connections
"#;

const HEARTBEAT_SCRIPT: &str = r#"
redis.call('HSETNX', KEYS[1], 'connections', 0)
redis.call('HSET', KEYS[1], 'heartbeat_ms', ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[1], ARGV[3])
return tonumber(redis.call('HGET', KEYS[1], 'connections'))
"#;

const DISCONNECT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {0, 0}
end
local connections = redis.call('HINCRBY', KEYS[1], 'connections', -1)
local heartbeat = tonumber(redis.call('HGET', KEYS[1], 'heartbeat_ms')) or 0
if connections <= 0 then
  redis.call('DEL', KEYS[1])
  redis.call('SREM', KEYS[2], ARGV[1])
  redis.call('ZREM', KEYS[3], ARGV[2])
  return {0, heartbeat}
end
return {connections, heartbeat}
"#;

// 只有心跳仍早于 cutoff 时才逐出，避免与并发心跳竞争
const EVICT_IF_STALE_SCRIPT: &str = r#"
local heartbeat = tonumber(redis.call('HGET', KEYS[1], 'heartbeat_ms'))
if heartbeat ~= nil and heartbeat >= tonumber(ARGV[1]) then
  return -1
end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[2])
redis.call('ZREM', KEYS[3], ARGV[3])
return heartbeat or 0
"#;

#[derive(Clone)]
pub struct RedisPresenceStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisPresenceStore {
    pub fn new(connection: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
        }
    }

    fn record_key(&self, tenant_id: TenantId, user_id: UserId) -> String {
        format!("{}presence:{}:{}", self.key_prefix, tenant_id, user_id)
    }

    fn tenant_key(&self, tenant_id: TenantId) -> String {
        format!("{}presence:tenant:{}", self.key_prefix, tenant_id)
    }

    fn index_key(&self) -> String {
        format!("{}presence:index", self.key_prefix)
    }

    async fn run_connect(&self, tenant_id: TenantId, user_id: UserId, now: Timestamp) -> RedisResult<u32> {
        let mut conn = self.connection.clone();
        let connections: i64 = Script::new(CONNECT_SCRIPT)
            .key(self.record_key(tenant_id, user_id))
            .key(self.tenant_key(tenant_id))
            .key(self.index_key())
            .arg(now.timestamp_millis())
            .arg(user_id.to_string())
            .arg(index_member(tenant_id, user_id))
            .invoke_async(&mut conn)
            .await?;
        Ok(clamp_connections(connections))
    }

    async fn run_heartbeat(&self, tenant_id: TenantId, user_id: UserId, now: Timestamp) -> RedisResult<u32> {
        let mut conn = self.connection.clone();
        let connections: i64 = Script::new(HEARTBEAT_SCRIPT)
            .key(self.record_key(tenant_id, user_id))
            .key(self.tenant_key(tenant_id))
            .key(self.index_key())
            .arg(now.timestamp_millis())
            .arg(user_id.to_string())
            .arg(index_member(tenant_id, user_id))
            .invoke_async(&mut conn)
            .await?;
        Ok(clamp_connections(connections))
    }

    async fn run_disconnect(&self, tenant_id: TenantId, user_id: UserId) -> RedisResult<Option<PresenceRecord>> {
        let mut conn = self.connection.clone();
        let (connections, heartbeat_ms): (i64, i64) = Script::new(DISCONNECT_SCRIPT)
            .key(self.record_key(tenant_id, user_id))
            .key(self.tenant_key(tenant_id))
            .key(self.index_key())
            .arg(user_id.to_string())
            .arg(index_member(tenant_id, user_id))
            .invoke_async(&mut conn)
            .await?;
        if connections <= 0 {
            return Ok(None);
        }
        Ok(Some(PresenceRecord {
            tenant_id,
            user_id,
            connections: clamp_connections(connections),
            last_heartbeat_at: from_millis(heartbeat_ms)?,
        }))
    }

    async fn read(&self, tenant_id: TenantId, user_id: UserId) -> RedisResult<Option<PresenceRecord>> {
        let mut conn = self.connection.clone();
        let (connections, heartbeat_ms): (Option<i64>, Option<i64>) = conn
            .hget(self.record_key(tenant_id, user_id), &["connections", "heartbeat_ms"])
            .await?;
        match heartbeat_ms {
            Some(heartbeat_ms) => Ok(Some(PresenceRecord {
                tenant_id,
                user_id,
                connections: clamp_connections(connections.unwrap_or(0)),
                last_heartbeat_at: from_millis(heartbeat_ms)?,
            })),
            None => Ok(None),
        }
    }

    async fn remove(&self, tenant_id: TenantId, user_id: UserId) -> RedisResult<()> {
        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .del(self.record_key(tenant_id, user_id))
            .ignore()
            .srem(self.tenant_key(tenant_id), user_id.to_string())
            .ignore()
            .zrem(self.index_key(), index_member(tenant_id, user_id))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn members(&self, tenant_id: TenantId) -> RedisResult<Vec<UserId>> {
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn.smembers(self.tenant_key(tenant_id)).await?;
        raw.iter().map(|id| parse_uuid(id).map(UserId::from)).collect()
    }

    async fn stale(&self, cutoff: Timestamp) -> RedisResult<Vec<PresenceRecord>> {
        let mut conn = self.connection.clone();
        // 分数严格小于 cutoff
        let candidates: Vec<String> = conn
            .zrangebyscore(self.index_key(), "-inf", format!("({}", cutoff.timestamp_millis()))
            .await?;

        let mut evicted = Vec::new();
        for member in candidates {
            let (tenant_id, user_id) = parse_index_member(&member)?;
            let heartbeat_ms: i64 = Script::new(EVICT_IF_STALE_SCRIPT)
                .key(self.record_key(tenant_id, user_id))
                .key(self.tenant_key(tenant_id))
                .key(self.index_key())
                .arg(cutoff.timestamp_millis())
                .arg(user_id.to_string())
                .arg(&member)
                .invoke_async(&mut conn)
                .await?;
            if heartbeat_ms >= 0 {
                evicted.push(PresenceRecord {
                    tenant_id,
                    user_id,
                    connections: 0,
                    last_heartbeat_at: from_millis(heartbeat_ms)?,
                });
            }
        }
        Ok(evicted)
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn get(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<PresenceRecord>, ApplicationError> {
        Ok(self.read(tenant_id, user_id).await?)
    }

    async fn record_connect(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<PresenceRecord, ApplicationError> {
        let connections = self.run_connect(tenant_id, user_id, now).await?;
        Ok(PresenceRecord {
            tenant_id,
            user_id,
            connections,
            last_heartbeat_at: now,
        })
    }

    async fn record_heartbeat(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<PresenceRecord, ApplicationError> {
        let connections = self.run_heartbeat(tenant_id, user_id, now).await?;
        Ok(PresenceRecord {
            tenant_id,
            user_id,
            connections,
            last_heartbeat_at: now,
        })
    }

    async fn record_disconnect(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<PresenceRecord>, ApplicationError> {
        Ok(self.run_disconnect(tenant_id, user_id).await?)
    }

    async fn evict(&self, tenant_id: TenantId, user_id: UserId) -> Result<(), ApplicationError> {
        Ok(self.remove(tenant_id, user_id).await?)
    }

    async fn list_tenant(&self, tenant_id: TenantId) -> Result<Vec<PresenceRecord>, ApplicationError> {
        let mut records = Vec::new();
        for user_id in self.members(tenant_id).await? {
            if let Some(record) = self.read(tenant_id, user_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn evict_stale(&self, cutoff: Timestamp) -> Result<Vec<PresenceRecord>, ApplicationError> {
        Ok(self.stale(cutoff).await?)
    }
}

fn index_member(tenant_id: TenantId, user_id: UserId) -> String {
    format!("{tenant_id}:{user_id}")
}

fn parse_index_member(member: &str) -> RedisResult<(TenantId, UserId)> {
    let (tenant, user) = member.split_once(':').ok_or_else(|| RedisError::InvalidData {
        message: format!("无效的在线索引成员: {member}"),
    })?;
    Ok((parse_uuid(tenant)?.into(), parse_uuid(user)?.into()))
}

fn parse_uuid(raw: &str) -> RedisResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| RedisError::InvalidData {
        message: format!("无效的 UUID `{raw}`: {e}"),
    })
}

fn from_millis(ms: i64) -> RedisResult<Timestamp> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| RedisError::InvalidData {
        message: format!("无效的时间戳: {ms}"),
    })
}

fn clamp_connections(raw: i64) -> u32 {
    raw.clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_members_round_trip() {
        let tenant = TenantId::generate();
        let user = UserId::generate();
        let member = index_member(tenant, user);
        assert_eq!(parse_index_member(&member).unwrap(), (tenant, user));
        assert!(parse_index_member("garbage").is_err());
    }

    #[test]
    fn negative_counts_clamp_to_zero() {
        assert_eq!(clamp_connections(-3), 0);
        assert_eq!(clamp_connections(2), 2);
    }
}
