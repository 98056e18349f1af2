//! 会话存储契约
//!
//! 所有查询都以租户为作用域，跨租户读取一律表现为不存在。
//! 实现方负责原子性：频道与所有者一起创建、附件关联与消息插入同一事务、
//! 软删除与编辑只对未删除的行生效。

use async_trait::async_trait;
use domain::{
    Attachment, AttachmentId, Channel, ChannelId, ChannelMember, ConversationTarget, DmThread,
    DmThreadId, Emoji, Message, MessageBody, MessageId, NewMessage, Reaction, ReadReceipt,
    RepositoryError, TenantId, TenantUser, ThreadSummary, Timestamp, UserId,
};

/// 历史消息分页游标，值为存储层的插入序号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryCursor {
    Latest,
    Before(i64),
    After(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: u32,
    pub cursor: HistoryCursor,
}

/// 条件移除成员的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRemoval {
    Removed,
    NotMember,
    LastMember,
}

/// 租户目录（外部用户系统的只读视图）
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_tenant_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<TenantUser>, RepositoryError>;

    async fn find_tenant_users(
        &self,
        tenant_id: TenantId,
        user_ids: &[UserId],
    ) -> Result<Vec<TenantUser>, RepositoryError>;
}

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// 频道和创建者的 owner 成员关系在同一事务中写入
    async fn create_channel_with_owner(
        &self,
        channel: Channel,
        owner: ChannelMember,
    ) -> Result<Channel, RepositoryError>;

    async fn find_channel(
        &self,
        tenant_id: TenantId,
        channel_id: ChannelId,
    ) -> Result<Option<Channel>, RepositoryError>;

    /// 公开频道加上用户所在的私有频道，按名称排序
    async fn list_visible_channels(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<Channel>, RepositoryError>;

    async fn list_joined_channels(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<Channel>, RepositoryError>;
}

#[async_trait]
pub trait ChannelMemberRepository: Send + Sync {
    async fn find_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<ChannelMember>, RepositoryError>;

    /// 已存在时返回 `Conflict`
    async fn insert_member(&self, member: ChannelMember) -> Result<ChannelMember, RepositoryError>;

    /// 只有在移除后频道仍有成员时才删除
    async fn remove_member_unless_last(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<MemberRemoval, RepositoryError>;

    async fn list_members(&self, channel_id: ChannelId) -> Result<Vec<ChannelMember>, RepositoryError>;
}

#[async_trait]
pub trait DmThreadRepository: Send + Sync {
    async fn find_dm_by_members(
        &self,
        tenant_id: TenantId,
        member_key: &str,
    ) -> Result<Option<DmThread>, RepositoryError>;

    /// (tenant, member_key) 唯一，重复时返回 `Conflict`
    async fn create_dm(&self, thread: DmThread) -> Result<DmThread, RepositoryError>;

    async fn find_dm(
        &self,
        tenant_id: TenantId,
        dm_thread_id: DmThreadId,
    ) -> Result<Option<DmThread>, RepositoryError>;

    async fn list_dms_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<DmThread>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 插入消息并关联附件。任一附件已被关联或不属于该租户时整体回滚并返回 `Conflict`。
    async fn create_message(
        &self,
        message: NewMessage,
        attachment_ids: &[AttachmentId],
    ) -> Result<Message, RepositoryError>;

    async fn find_message(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
    ) -> Result<Option<Message>, RepositoryError>;

    /// 仅对未删除的消息生效，否则返回 `Conflict`
    async fn save_message_edit(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
        body: MessageBody,
        edited_at: Timestamp,
    ) -> Result<Message, RepositoryError>;

    /// 仅对未删除的消息生效，否则返回 `Conflict`
    async fn mark_message_deleted(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
        deleted_at: Timestamp,
    ) -> Result<Message, RepositoryError>;

    /// 顶层消息（不含回复），按序号升序返回，排除已归档，保留已删除
    async fn list_messages(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn list_replies(
        &self,
        tenant_id: TenantId,
        parent_message_id: MessageId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// 只返回至少有一条有效回复的父消息
    async fn thread_summaries(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        parent_message_ids: &[MessageId],
    ) -> Result<Vec<ThreadSummary>, RepositoryError>;

    /// 其他人发送的、序号大于 `after_seq` 的未删除消息数量
    async fn count_unread(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        user_id: UserId,
        after_seq: Option<i64>,
    ) -> Result<i64, RepositoryError>;

    async fn archive_created_before(
        &self,
        cutoff: Timestamp,
        archived_at: Timestamp,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    async fn create_attachment(&self, attachment: Attachment) -> Result<Attachment, RepositoryError>;

    async fn find_attachments(
        &self,
        tenant_id: TenantId,
        ids: &[AttachmentId],
    ) -> Result<Vec<Attachment>, RepositoryError>;

    async fn list_attachments_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Attachment>, RepositoryError>;
}

#[async_trait]
pub trait ReactionRepository: Send + Sync {
    /// (message, user, emoji) 已存在时返回 `false`
    async fn insert_reaction(&self, reaction: Reaction) -> Result<bool, RepositoryError>;

    async fn delete_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &Emoji,
    ) -> Result<bool, RepositoryError>;

    async fn list_reactions_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Reaction>, RepositoryError>;
}

#[async_trait]
pub trait ReadReceiptRepository: Send + Sync {
    async fn upsert_receipt(&self, receipt: ReadReceipt) -> Result<ReadReceipt, RepositoryError>;

    async fn find_receipt(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        target: ConversationTarget,
    ) -> Result<Option<ReadReceipt>, RepositoryError>;

    async fn list_receipts_for_target(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
    ) -> Result<Vec<ReadReceipt>, RepositoryError>;
}

/// 完整的会话存储能力
pub trait ConversationStore:
    TenantDirectory
    + ChannelRepository
    + ChannelMemberRepository
    + DmThreadRepository
    + MessageRepository
    + AttachmentRepository
    + ReactionRepository
    + ReadReceiptRepository
{
}

impl<T> ConversationStore for T where
    T: TenantDirectory
        + ChannelRepository
        + ChannelMemberRepository
        + DmThreadRepository
        + MessageRepository
        + AttachmentRepository
        + ReactionRepository
        + ReadReceiptRepository
{
}
