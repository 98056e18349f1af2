use application::repository::AttachmentRepository;
use async_trait::async_trait;
use domain::{Attachment, AttachmentId, MessageId, RepositoryError, TenantId};
use uuid::Uuid;

use super::records::{AttachmentRecord, ATTACHMENT_COLUMNS};
use super::{map_sqlx_err, uuids, PgConversationStore};

#[async_trait]
impl AttachmentRepository for PgConversationStore {
    async fn create_attachment(&self, attachment: Attachment) -> Result<Attachment, RepositoryError> {
        let record = sqlx::query_as::<_, AttachmentRecord>(&format!(
            r#"
            INSERT INTO attachments (id, tenant_id, uploader_id, message_id, file_name, mime_type, size_bytes, storage_key, url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {ATTACHMENT_COLUMNS}
            "#
        ))
        .bind(Uuid::from(attachment.id))
        .bind(Uuid::from(attachment.tenant_id))
        .bind(Uuid::from(attachment.uploader_id))
        .bind(attachment.message_id.map(Uuid::from))
        .bind(&attachment.file_name)
        .bind(&attachment.mime_type)
        .bind(attachment.size_bytes)
        .bind(&attachment.storage_key)
        .bind(&attachment.url)
        .bind(attachment.created_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn find_attachments(
        &self,
        tenant_id: TenantId,
        ids: &[AttachmentId],
    ) -> Result<Vec<Attachment>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, AttachmentRecord>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE tenant_id = $1 AND id = ANY($2)"
        ))
        .bind(Uuid::from(tenant_id))
        .bind(uuids(ids))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Attachment::from).collect())
    }

    async fn list_attachments_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Attachment>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, AttachmentRecord>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE message_id = ANY($1) ORDER BY created_at, id"
        ))
        .bind(uuids(message_ids))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Attachment::from).collect())
    }
}
