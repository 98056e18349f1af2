use std::collections::{BTreeMap, HashMap};

use domain::{
    Attachment, AttachmentId, Channel, ChannelId, ChannelMember, ChannelRole, ConversationTarget,
    DmThread, DmThreadId, Message, MessageId, Reaction, ReadReceipt, TenantId, ThreadSummary,
    Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

pub use crate::presence::{PresencePayload, PresenceStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorDto {
    pub user_id: UserId,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDto {
    pub id: AttachmentId,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub url: String,
    pub created_at: Timestamp,
}

impl From<Attachment> for AttachmentDto {
    fn from(attachment: Attachment) -> Self {
        Self {
            id: attachment.id,
            file_name: attachment.file_name,
            mime_type: attachment.mime_type,
            size_bytes: attachment.size_bytes,
            url: attachment.url,
            created_at: attachment.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummaryDto {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummaryDto {
    pub parent_message_id: MessageId,
    pub reply_count: i64,
    pub last_reply_at: Option<Timestamp>,
    pub last_reply_author_id: Option<UserId>,
}

impl From<ThreadSummary> for ThreadSummaryDto {
    fn from(summary: ThreadSummary) -> Self {
        Self {
            parent_message_id: summary.parent_message_id,
            reply_count: summary.reply_count,
            last_reply_at: summary.last_reply_at,
            last_reply_author_id: summary.last_reply_author_id,
        }
    }
}

/// 对外的消息视图。已删除消息只保留墓碑：正文、附件和表情都不再返回。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: MessageId,
    pub seq: i64,
    pub tenant_id: TenantId,
    pub target: ConversationTarget,
    pub author: AuthorDto,
    pub body: Option<String>,
    pub parent_message_id: Option<MessageId>,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
    pub is_deleted: bool,
    pub attachments: Vec<AttachmentDto>,
    pub reactions: Vec<ReactionSummaryDto>,
    /// 顶层消息才有线程汇总
    pub thread: Option<ThreadSummaryDto>,
}

/// 批量水合一页消息所需的关联数据
#[derive(Debug, Default)]
pub struct MessageRelations {
    pub display_names: HashMap<UserId, String>,
    pub attachments: HashMap<MessageId, Vec<Attachment>>,
    pub reactions: HashMap<MessageId, Vec<Reaction>>,
    pub threads: HashMap<MessageId, ThreadSummary>,
}

impl MessageDto {
    pub fn hydrate(message: Message, relations: &MessageRelations) -> Self {
        let deleted = message.is_deleted();
        let attachments = if deleted {
            Vec::new()
        } else {
            relations
                .attachments
                .get(&message.id)
                .map(|list| list.iter().cloned().map(AttachmentDto::from).collect())
                .unwrap_or_default()
        };
        let reactions = if deleted {
            Vec::new()
        } else {
            summarize_reactions(relations.reactions.get(&message.id).map(Vec::as_slice))
        };
        let thread = (!message.is_reply()).then(|| {
            ThreadSummaryDto::from(
                relations
                    .threads
                    .get(&message.id)
                    .cloned()
                    .unwrap_or_else(|| ThreadSummary::empty(message.id)),
            )
        });

        Self {
            id: message.id,
            seq: message.seq,
            tenant_id: message.tenant_id,
            target: message.target,
            author: AuthorDto {
                user_id: message.author_id,
                display_name: relations.display_names.get(&message.author_id).cloned(),
            },
            body: (!deleted).then(|| message.body.as_str().to_owned()),
            parent_message_id: message.parent_message_id,
            created_at: message.created_at,
            edited_at: message.edited_at,
            deleted_at: message.deleted_at,
            is_deleted: deleted,
            attachments,
            reactions,
            thread,
        }
    }
}

fn summarize_reactions(reactions: Option<&[Reaction]>) -> Vec<ReactionSummaryDto> {
    let mut grouped: BTreeMap<&str, Vec<UserId>> = BTreeMap::new();
    for reaction in reactions.unwrap_or_default() {
        grouped
            .entry(reaction.emoji.as_str())
            .or_default()
            .push(reaction.user_id);
    }
    grouped
        .into_iter()
        .map(|(emoji, user_ids)| ReactionSummaryDto {
            emoji: emoji.to_owned(),
            count: user_ids.len(),
            user_ids,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePageDto {
    pub messages: Vec<MessageDto>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDto {
    pub id: ChannelId,
    pub name: String,
    pub is_private: bool,
    pub created_by: UserId,
    pub created_at: Timestamp,
}

impl From<Channel> for ChannelDto {
    fn from(channel: Channel) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            is_private: channel.is_private,
            created_by: channel.created_by,
            created_at: channel.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMemberDto {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub role: ChannelRole,
    pub joined_at: Timestamp,
}

impl ChannelMemberDto {
    pub fn new(member: ChannelMember, display_name: Option<String>) -> Self {
        Self {
            channel_id: member.channel_id,
            user_id: member.user_id,
            display_name,
            role: member.role,
            joined_at: member.joined_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmThreadDto {
    pub id: DmThreadId,
    pub member_ids: Vec<UserId>,
    pub created_by: UserId,
    pub created_at: Timestamp,
}

impl From<DmThread> for DmThreadDto {
    fn from(thread: DmThread) -> Self {
        Self {
            id: thread.id,
            member_ids: thread.member_ids,
            created_by: thread.created_by,
            created_at: thread.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDmDto {
    pub thread: DmThreadDto,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceiptDto {
    pub user_id: UserId,
    pub target: ConversationTarget,
    pub last_read_message_id: MessageId,
    pub last_read_at: Timestamp,
}

impl From<ReadReceipt> for ReadReceiptDto {
    fn from(receipt: ReadReceipt) -> Self {
        Self {
            user_id: receipt.user_id,
            target: receipt.target,
            last_read_message_id: receipt.last_read_message_id,
            last_read_at: receipt.last_read_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadStateDto {
    pub target: ConversationTarget,
    pub receipts: Vec<ReadReceiptDto>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCountDto {
    pub target: ConversationTarget,
    pub unread_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionResultDto {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    /// 重复的表情反应不会新建记录
    pub created: bool,
}
