//! 数据库行与领域实体之间的转换

use chrono::{DateTime, Utc};
use domain::{
    Attachment, AttachmentId, Channel, ChannelId, ChannelMember, ChannelRole, ConversationTarget,
    DmThread, DmThreadId, Emoji, Message, MessageBody, MessageId, Reaction, ReadReceipt,
    RepositoryError, TargetType, TenantId, TenantRole, TenantUser, ThreadSummary, UserId,
};
use sqlx::FromRow;
use uuid::Uuid;

use super::invalid_data;

pub(crate) const MESSAGE_COLUMNS: &str = "id, seq, tenant_id, channel_id, dm_thread_id, author_id, body, parent_message_id, created_at, edited_at, deleted_at, archived_at";

pub(crate) const ATTACHMENT_COLUMNS: &str =
    "id, tenant_id, uploader_id, message_id, file_name, mime_type, size_bytes, storage_key, url, created_at";

#[derive(Debug, FromRow)]
pub(crate) struct TenantUserRecord {
    tenant_id: Uuid,
    user_id: Uuid,
    display_name: String,
    role: String,
}

impl TryFrom<TenantUserRecord> for TenantUser {
    type Error = RepositoryError;

    fn try_from(value: TenantUserRecord) -> Result<Self, Self::Error> {
        Ok(TenantUser {
            tenant_id: TenantId::from(value.tenant_id),
            user_id: UserId::from(value.user_id),
            display_name: value.display_name,
            role: TenantRole::parse(&value.role).map_err(|err| invalid_data(err.to_string()))?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ChannelRecord {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    is_private: bool,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl From<ChannelRecord> for Channel {
    fn from(value: ChannelRecord) -> Self {
        Channel {
            id: ChannelId::from(value.id),
            tenant_id: TenantId::from(value.tenant_id),
            name: value.name,
            is_private: value.is_private,
            created_by: UserId::from(value.created_by),
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MemberRecord {
    channel_id: Uuid,
    user_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
}

impl TryFrom<MemberRecord> for ChannelMember {
    type Error = RepositoryError;

    fn try_from(value: MemberRecord) -> Result<Self, Self::Error> {
        Ok(ChannelMember {
            channel_id: ChannelId::from(value.channel_id),
            user_id: UserId::from(value.user_id),
            role: ChannelRole::parse(&value.role).map_err(|err| invalid_data(err.to_string()))?,
            joined_at: value.joined_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct DmThreadRecord {
    id: Uuid,
    tenant_id: Uuid,
    member_key: String,
    member_ids: Vec<Uuid>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl From<DmThreadRecord> for DmThread {
    fn from(value: DmThreadRecord) -> Self {
        DmThread {
            id: DmThreadId::from(value.id),
            tenant_id: TenantId::from(value.tenant_id),
            member_ids: value.member_ids.into_iter().map(UserId::from).collect(),
            member_key: value.member_key,
            created_by: UserId::from(value.created_by),
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MessageRecord {
    id: Uuid,
    seq: i64,
    tenant_id: Uuid,
    channel_id: Option<Uuid>,
    dm_thread_id: Option<Uuid>,
    author_id: Uuid,
    body: String,
    parent_message_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let target = ConversationTarget::from_columns(value.channel_id, value.dm_thread_id)
            .map_err(|err| invalid_data(err.to_string()))?;
        let body = MessageBody::new(value.body).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            seq: value.seq,
            tenant_id: TenantId::from(value.tenant_id),
            target,
            author_id: UserId::from(value.author_id),
            body,
            parent_message_id: value.parent_message_id.map(MessageId::from),
            created_at: value.created_at,
            edited_at: value.edited_at,
            deleted_at: value.deleted_at,
            archived_at: value.archived_at,
        })
    }
}

pub(crate) fn messages_from(records: Vec<MessageRecord>) -> Result<Vec<Message>, RepositoryError> {
    records.into_iter().map(Message::try_from).collect()
}

#[derive(Debug, FromRow)]
pub(crate) struct ThreadSummaryRecord {
    parent_message_id: Uuid,
    reply_count: i64,
    last_reply_at: Option<DateTime<Utc>>,
    last_reply_author_id: Option<Uuid>,
}

impl From<ThreadSummaryRecord> for ThreadSummary {
    fn from(value: ThreadSummaryRecord) -> Self {
        ThreadSummary {
            parent_message_id: MessageId::from(value.parent_message_id),
            reply_count: value.reply_count,
            last_reply_at: value.last_reply_at,
            last_reply_author_id: value.last_reply_author_id.map(UserId::from),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct AttachmentRecord {
    id: Uuid,
    tenant_id: Uuid,
    uploader_id: Uuid,
    message_id: Option<Uuid>,
    file_name: String,
    mime_type: String,
    size_bytes: i64,
    storage_key: String,
    url: String,
    created_at: DateTime<Utc>,
}

impl From<AttachmentRecord> for Attachment {
    fn from(value: AttachmentRecord) -> Self {
        Attachment {
            id: AttachmentId::from(value.id),
            tenant_id: TenantId::from(value.tenant_id),
            uploader_id: UserId::from(value.uploader_id),
            message_id: value.message_id.map(MessageId::from),
            file_name: value.file_name,
            mime_type: value.mime_type,
            size_bytes: value.size_bytes,
            storage_key: value.storage_key,
            url: value.url,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ReactionRecord {
    message_id: Uuid,
    user_id: Uuid,
    emoji: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReactionRecord> for Reaction {
    type Error = RepositoryError;

    fn try_from(value: ReactionRecord) -> Result<Self, Self::Error> {
        Ok(Reaction {
            message_id: MessageId::from(value.message_id),
            user_id: UserId::from(value.user_id),
            emoji: Emoji::parse(value.emoji).map_err(|err| invalid_data(err.to_string()))?,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ReadReceiptRecord {
    tenant_id: Uuid,
    user_id: Uuid,
    target_type: String,
    target_id: Uuid,
    last_read_message_id: Uuid,
    last_read_at: DateTime<Utc>,
}

impl TryFrom<ReadReceiptRecord> for ReadReceipt {
    type Error = RepositoryError;

    fn try_from(value: ReadReceiptRecord) -> Result<Self, Self::Error> {
        let target_type =
            TargetType::parse(&value.target_type).map_err(|err| invalid_data(err.to_string()))?;
        Ok(ReadReceipt {
            tenant_id: TenantId::from(value.tenant_id),
            user_id: UserId::from(value.user_id),
            target: ConversationTarget::from_parts(target_type, value.target_id),
            last_read_message_id: MessageId::from(value.last_read_message_id),
            last_read_at: value.last_read_at,
        })
    }
}
