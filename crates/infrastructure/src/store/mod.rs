//! PostgreSQL 会话存储
//!
//! 按仓储契约拆分为多个文件，所有 trait 都实现在同一个 [`PgConversationStore`] 上，
//! 应用层拿到的是完整的 `ConversationStore`。

mod attachment;
mod channel;
mod dm;
mod message;
mod read_receipt;
mod records;

use application::repository::TenantDirectory;
use async_trait::async_trait;
use domain::{RepositoryError, TenantId, TenantUser, UserId};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use records::TenantUserRecord;

const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            RepositoryError::Conflict
        }
        _ => RepositoryError::storage(err.to_string()),
    }
}

pub(crate) fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

pub(crate) fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 写入或更新租户目录中的用户，供同步任务和测试使用
    pub async fn upsert_tenant_user(&self, user: &TenantUser) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO tenant_users (tenant_id, user_id, display_name, role)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, user_id)
            DO UPDATE SET display_name = EXCLUDED.display_name, role = EXCLUDED.role
            "#,
        )
        .bind(Uuid::from(user.tenant_id))
        .bind(Uuid::from(user.user_id))
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[async_trait]
impl TenantDirectory for PgConversationStore {
    async fn find_tenant_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<TenantUser>, RepositoryError> {
        let record = sqlx::query_as::<_, TenantUserRecord>(
            r#"SELECT tenant_id, user_id, display_name, role FROM tenant_users WHERE tenant_id = $1 AND user_id = $2"#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(TenantUser::try_from).transpose()
    }

    async fn find_tenant_users(
        &self,
        tenant_id: TenantId,
        user_ids: &[UserId],
    ) -> Result<Vec<TenantUser>, RepositoryError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, TenantUserRecord>(
            r#"SELECT tenant_id, user_id, display_name, role FROM tenant_users WHERE tenant_id = $1 AND user_id = ANY($2)"#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(uuids(user_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(TenantUser::try_from).collect()
    }
}
