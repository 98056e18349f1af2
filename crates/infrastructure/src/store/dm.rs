use application::repository::DmThreadRepository;
use async_trait::async_trait;
use domain::{DmThread, DmThreadId, RepositoryError, TenantId, UserId};
use uuid::Uuid;

use super::records::DmThreadRecord;
use super::{map_sqlx_err, uuids, PgConversationStore};

#[async_trait]
impl DmThreadRepository for PgConversationStore {
    async fn find_dm_by_members(
        &self,
        tenant_id: TenantId,
        member_key: &str,
    ) -> Result<Option<DmThread>, RepositoryError> {
        let record = sqlx::query_as::<_, DmThreadRecord>(
            r#"SELECT id, tenant_id, member_key, member_ids, created_by, created_at FROM dm_threads WHERE tenant_id = $1 AND member_key = $2"#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(member_key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(DmThread::from))
    }

    async fn create_dm(&self, thread: DmThread) -> Result<DmThread, RepositoryError> {
        let record = sqlx::query_as::<_, DmThreadRecord>(
            r#"
            INSERT INTO dm_threads (id, tenant_id, member_key, member_ids, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, tenant_id, member_key, member_ids, created_by, created_at
            "#,
        )
        .bind(Uuid::from(thread.id))
        .bind(Uuid::from(thread.tenant_id))
        .bind(&thread.member_key)
        .bind(uuids(&thread.member_ids))
        .bind(Uuid::from(thread.created_by))
        .bind(thread.created_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn find_dm(
        &self,
        tenant_id: TenantId,
        dm_thread_id: DmThreadId,
    ) -> Result<Option<DmThread>, RepositoryError> {
        let record = sqlx::query_as::<_, DmThreadRecord>(
            r#"SELECT id, tenant_id, member_key, member_ids, created_by, created_at FROM dm_threads WHERE id = $1 AND tenant_id = $2"#,
        )
        .bind(Uuid::from(dm_thread_id))
        .bind(Uuid::from(tenant_id))
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(DmThread::from))
    }

    async fn list_dms_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<DmThread>, RepositoryError> {
        let records = sqlx::query_as::<_, DmThreadRecord>(
            r#"
            SELECT id, tenant_id, member_key, member_ids, created_by, created_at
            FROM dm_threads
            WHERE tenant_id = $1 AND $2 = ANY(member_ids)
            ORDER BY created_at
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(user_id))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(DmThread::from).collect())
    }
}
