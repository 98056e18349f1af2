use application::repository::ReadReceiptRepository;
use async_trait::async_trait;
use domain::{ConversationTarget, ReadReceipt, RepositoryError, TenantId, UserId};
use uuid::Uuid;

use super::records::ReadReceiptRecord;
use super::{map_sqlx_err, PgConversationStore};

const RECEIPT_COLUMNS: &str =
    "tenant_id, user_id, target_type, target_id, last_read_message_id, last_read_at";

#[async_trait]
impl ReadReceiptRepository for PgConversationStore {
    async fn upsert_receipt(&self, receipt: ReadReceipt) -> Result<ReadReceipt, RepositoryError> {
        let record = sqlx::query_as::<_, ReadReceiptRecord>(&format!(
            r#"
            INSERT INTO read_receipts (tenant_id, user_id, target_type, target_id, last_read_message_id, last_read_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, user_id, target_type, target_id)
            DO UPDATE SET last_read_message_id = EXCLUDED.last_read_message_id,
                          last_read_at = EXCLUDED.last_read_at
            RETURNING {RECEIPT_COLUMNS}
            "#
        ))
        .bind(Uuid::from(receipt.tenant_id))
        .bind(Uuid::from(receipt.user_id))
        .bind(receipt.target.target_type().as_str())
        .bind(receipt.target.id())
        .bind(Uuid::from(receipt.last_read_message_id))
        .bind(receipt.last_read_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        ReadReceipt::try_from(record)
    }

    async fn find_receipt(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        target: ConversationTarget,
    ) -> Result<Option<ReadReceipt>, RepositoryError> {
        let record = sqlx::query_as::<_, ReadReceiptRecord>(&format!(
            r#"
            SELECT {RECEIPT_COLUMNS} FROM read_receipts
            WHERE tenant_id = $1 AND user_id = $2 AND target_type = $3 AND target_id = $4
            "#
        ))
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(user_id))
        .bind(target.target_type().as_str())
        .bind(target.id())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        record.map(ReadReceipt::try_from).transpose()
    }

    async fn list_receipts_for_target(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
    ) -> Result<Vec<ReadReceipt>, RepositoryError> {
        let records = sqlx::query_as::<_, ReadReceiptRecord>(&format!(
            r#"
            SELECT {RECEIPT_COLUMNS} FROM read_receipts
            WHERE tenant_id = $1 AND target_type = $2 AND target_id = $3
            ORDER BY last_read_at
            "#
        ))
        .bind(Uuid::from(tenant_id))
        .bind(target.target_type().as_str())
        .bind(target.id())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ReadReceipt::try_from).collect()
    }
}
