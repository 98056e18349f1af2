use application::repository::{ChannelMemberRepository, ChannelRepository, MemberRemoval};
use async_trait::async_trait;
use domain::{Channel, ChannelId, ChannelMember, RepositoryError, TenantId, UserId};
use uuid::Uuid;

use super::records::{ChannelRecord, MemberRecord};
use super::{map_sqlx_err, PgConversationStore};

#[async_trait]
impl ChannelRepository for PgConversationStore {
    async fn create_channel_with_owner(
        &self,
        channel: Channel,
        owner: ChannelMember,
    ) -> Result<Channel, RepositoryError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, ChannelRecord>(
            r#"
            INSERT INTO channels (id, tenant_id, name, is_private, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, tenant_id, name, is_private, created_by, created_at
            "#,
        )
        .bind(Uuid::from(channel.id))
        .bind(Uuid::from(channel.tenant_id))
        .bind(&channel.name)
        .bind(channel.is_private)
        .bind(Uuid::from(channel.created_by))
        .bind(channel.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"INSERT INTO channel_members (channel_id, user_id, role, joined_at) VALUES ($1, $2, $3, $4)"#,
        )
        .bind(Uuid::from(owner.channel_id))
        .bind(Uuid::from(owner.user_id))
        .bind(owner.role.as_str())
        .bind(owner.joined_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(record.into())
    }

    async fn find_channel(
        &self,
        tenant_id: TenantId,
        channel_id: ChannelId,
    ) -> Result<Option<Channel>, RepositoryError> {
        let record = sqlx::query_as::<_, ChannelRecord>(
            r#"SELECT id, tenant_id, name, is_private, created_by, created_at FROM channels WHERE id = $1 AND tenant_id = $2"#,
        )
        .bind(Uuid::from(channel_id))
        .bind(Uuid::from(tenant_id))
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Channel::from))
    }

    async fn list_visible_channels(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<Channel>, RepositoryError> {
        let records = sqlx::query_as::<_, ChannelRecord>(
            r#"
            SELECT c.id, c.tenant_id, c.name, c.is_private, c.created_by, c.created_at
            FROM channels c
            WHERE c.tenant_id = $1
              AND (c.is_private = FALSE
                   OR EXISTS (SELECT 1 FROM channel_members m WHERE m.channel_id = c.id AND m.user_id = $2))
            ORDER BY c.name, c.created_at
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(user_id))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Channel::from).collect())
    }

    async fn list_joined_channels(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<Channel>, RepositoryError> {
        let records = sqlx::query_as::<_, ChannelRecord>(
            r#"
            SELECT c.id, c.tenant_id, c.name, c.is_private, c.created_by, c.created_at
            FROM channels c
            JOIN channel_members m ON m.channel_id = c.id
            WHERE c.tenant_id = $1 AND m.user_id = $2
            ORDER BY c.name, c.created_at
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .bind(Uuid::from(user_id))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Channel::from).collect())
    }
}

#[async_trait]
impl ChannelMemberRepository for PgConversationStore {
    async fn find_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<ChannelMember>, RepositoryError> {
        let record = sqlx::query_as::<_, MemberRecord>(
            r#"SELECT channel_id, user_id, role, joined_at FROM channel_members WHERE channel_id = $1 AND user_id = $2"#,
        )
        .bind(Uuid::from(channel_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        record.map(ChannelMember::try_from).transpose()
    }

    async fn insert_member(&self, member: ChannelMember) -> Result<ChannelMember, RepositoryError> {
        let record = sqlx::query_as::<_, MemberRecord>(
            r#"
            INSERT INTO channel_members (channel_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            RETURNING channel_id, user_id, role, joined_at
            "#,
        )
        .bind(Uuid::from(member.channel_id))
        .bind(Uuid::from(member.user_id))
        .bind(member.role.as_str())
        .bind(member.joined_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        ChannelMember::try_from(record)
    }

    async fn remove_member_unless_last(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<MemberRemoval, RepositoryError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

        // 锁住频道行，串行化同一频道上的并发离开
        sqlx::query("SELECT id FROM channels WHERE id = $1 FOR UPDATE")
            .bind(Uuid::from(channel_id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let (is_member, member_count): (bool, i64) = sqlx::query_as(
            r#"
            SELECT
                EXISTS (SELECT 1 FROM channel_members WHERE channel_id = $1 AND user_id = $2),
                (SELECT COUNT(*) FROM channel_members WHERE channel_id = $1)
            "#,
        )
        .bind(Uuid::from(channel_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let outcome = if !is_member {
            MemberRemoval::NotMember
        } else if member_count <= 1 {
            MemberRemoval::LastMember
        } else {
            sqlx::query("DELETE FROM channel_members WHERE channel_id = $1 AND user_id = $2")
                .bind(Uuid::from(channel_id))
                .bind(Uuid::from(user_id))
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            MemberRemoval::Removed
        };

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(outcome)
    }

    async fn list_members(&self, channel_id: ChannelId) -> Result<Vec<ChannelMember>, RepositoryError> {
        let records = sqlx::query_as::<_, MemberRecord>(
            r#"SELECT channel_id, user_id, role, joined_at FROM channel_members WHERE channel_id = $1 ORDER BY joined_at, user_id"#,
        )
        .bind(Uuid::from(channel_id))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ChannelMember::try_from).collect()
    }
}
