use application::repository::{HistoryCursor, HistoryQuery, MessageRepository, ReactionRepository};
use async_trait::async_trait;
use domain::{
    AttachmentId, ConversationTarget, Emoji, Message, MessageBody, MessageId, NewMessage, Reaction,
    RepositoryError, TenantId, ThreadSummary, Timestamp, UserId,
};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::records::{
    messages_from, MessageRecord, ReactionRecord, ThreadSummaryRecord, MESSAGE_COLUMNS,
};
use super::{map_sqlx_err, uuids, PgConversationStore};

/// 会话对应的外键列名
fn target_column(target: ConversationTarget) -> &'static str {
    match target {
        ConversationTarget::Channel(_) => "channel_id",
        ConversationTarget::Dm(_) => "dm_thread_id",
    }
}

impl PgConversationStore {
    /// 条件更新未命中时区分“不存在”和“已删除”
    async fn missing_or_deleted(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
    ) -> RepositoryError {
        match self.find_message(tenant_id, message_id).await {
            Ok(Some(_)) => RepositoryError::Conflict,
            Ok(None) => RepositoryError::NotFound,
            Err(err) => err,
        }
    }
}

#[async_trait]
impl MessageRepository for PgConversationStore {
    async fn create_message(
        &self,
        message: NewMessage,
        attachment_ids: &[AttachmentId],
    ) -> Result<Message, RepositoryError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages (id, tenant_id, channel_id, dm_thread_id, author_id, body, parent_message_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.tenant_id))
        .bind(message.target.channel_id().map(Uuid::from))
        .bind(message.target.dm_thread_id().map(Uuid::from))
        .bind(Uuid::from(message.author_id))
        .bind(message.body.as_str())
        .bind(message.parent_message_id.map(Uuid::from))
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        if !attachment_ids.is_empty() {
            // 只关联本租户且尚未关联的附件，数量不符说明有附件被并发占用
            let linked = sqlx::query(
                r#"
                UPDATE attachments SET message_id = $1
                WHERE id = ANY($2) AND tenant_id = $3 AND message_id IS NULL
                "#,
            )
            .bind(Uuid::from(message.id))
            .bind(uuids(attachment_ids))
            .bind(Uuid::from(message.tenant_id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .rows_affected();

            if linked != attachment_ids.len() as u64 {
                tx.rollback().await.map_err(map_sqlx_err)?;
                return Err(RepositoryError::Conflict);
            }
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Message::try_from(record)
    }

    async fn find_message(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
    ) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(tenant_id))
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn save_message_edit(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
        body: MessageBody,
        edited_at: Timestamp,
    ) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE messages SET body = $3, edited_at = $4
            WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(tenant_id))
        .bind(body.as_str())
        .bind(edited_at)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Message::try_from(record),
            None => Err(self.missing_or_deleted(tenant_id, message_id).await),
        }
    }

    async fn mark_message_deleted(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
        deleted_at: Timestamp,
    ) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE messages SET deleted_at = $3
            WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(tenant_id))
        .bind(deleted_at)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Message::try_from(record),
            None => Err(self.missing_or_deleted(tenant_id, message_id).await),
        }
    }

    async fn list_messages(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE tenant_id = "));
        builder.push_bind(Uuid::from(tenant_id));
        builder.push(format!(" AND {} = ", target_column(target)));
        builder.push_bind(target.id());
        builder.push(" AND parent_message_id IS NULL AND archived_at IS NULL");

        let newest_first = match query.cursor {
            HistoryCursor::Latest => true,
            HistoryCursor::Before(seq) => {
                builder.push(" AND seq < ").push_bind(seq);
                true
            }
            HistoryCursor::After(seq) => {
                builder.push(" AND seq > ").push_bind(seq);
                false
            }
        };
        builder.push(if newest_first {
            " ORDER BY seq DESC LIMIT "
        } else {
            " ORDER BY seq ASC LIMIT "
        });
        builder.push_bind(i64::from(query.limit));

        let records = builder
            .build_query_as::<MessageRecord>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_err)?;

        let mut messages = messages_from(records)?;
        if newest_first {
            messages.reverse();
        }
        Ok(messages)
    }

    async fn list_replies(
        &self,
        tenant_id: TenantId,
        parent_message_id: MessageId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE tenant_id = $1 AND parent_message_id = $2 AND archived_at IS NULL
            ORDER BY seq ASC
            LIMIT $3
            "#
        ))
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(parent_message_id))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        messages_from(records)
    }

    async fn thread_summaries(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        parent_message_ids: &[MessageId],
    ) -> Result<Vec<ThreadSummary>, RepositoryError> {
        if parent_message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ThreadSummaryRecord>(&format!(
            r#"
            SELECT DISTINCT ON (parent_message_id)
                parent_message_id,
                COUNT(*) OVER (PARTITION BY parent_message_id) AS reply_count,
                created_at AS last_reply_at,
                author_id AS last_reply_author_id
            FROM messages
            WHERE tenant_id = $1
              AND {column} = $2
              AND parent_message_id = ANY($3)
              AND deleted_at IS NULL
              AND archived_at IS NULL
            ORDER BY parent_message_id, seq DESC
            "#,
            column = target_column(target),
        ))
        .bind(Uuid::from(tenant_id))
        .bind(target.id())
        .bind(uuids(parent_message_ids))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(ThreadSummary::from).collect())
    }

    async fn count_unread(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        user_id: UserId,
        after_seq: Option<i64>,
    ) -> Result<i64, RepositoryError> {
        sqlx::query_scalar::<_, i64>(&format!(
            r#"
            SELECT COUNT(*) FROM messages
            WHERE tenant_id = $1
              AND {column} = $2
              AND author_id <> $3
              AND seq > $4
              AND deleted_at IS NULL
              AND archived_at IS NULL
            "#,
            column = target_column(target),
        ))
        .bind(Uuid::from(tenant_id))
        .bind(target.id())
        .bind(Uuid::from(user_id))
        .bind(after_seq.unwrap_or(0))
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)
    }

    async fn archive_created_before(
        &self,
        cutoff: Timestamp,
        archived_at: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE messages SET archived_at = $2 WHERE archived_at IS NULL AND created_at < $1"#,
        )
        .bind(cutoff)
        .bind(archived_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ReactionRepository for PgConversationStore {
    async fn insert_reaction(&self, reaction: Reaction) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id, user_id, emoji) DO NOTHING
            "#,
        )
        .bind(Uuid::from(reaction.message_id))
        .bind(Uuid::from(reaction.user_id))
        .bind(reaction.emoji.as_str())
        .bind(reaction.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &Emoji,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3"#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .bind(emoji.as_str())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_reactions_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Reaction>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ReactionRecord>(
            r#"
            SELECT message_id, user_id, emoji, created_at FROM message_reactions
            WHERE message_id = ANY($1)
            ORDER BY created_at, user_id
            "#,
        )
        .bind(uuids(message_ids))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Reaction::try_from).collect()
    }
}
