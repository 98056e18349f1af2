//! 内存实现的会话存储，用于测试和单机开发。
//!
//! 所有状态放在一把异步读写锁后面，每个操作持锁完成，天然满足契约要求的原子性。

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use domain::{
    Attachment, AttachmentId, Channel, ChannelId, ChannelMember, ConversationTarget, DmThread,
    DmThreadId, Emoji, Message, MessageBody, MessageId, NewMessage, Reaction, ReadReceipt,
    RepositoryError, TenantId, TenantUser, ThreadSummary, Timestamp, UserId,
};
use tokio::sync::RwLock;

use crate::repository::{
    AttachmentRepository, ChannelMemberRepository, ChannelRepository, DmThreadRepository,
    HistoryCursor, HistoryQuery, MemberRemoval, MessageRepository, ReactionRepository,
    ReadReceiptRepository, TenantDirectory,
};

#[derive(Default)]
struct State {
    users: HashMap<(TenantId, UserId), TenantUser>,
    channels: HashMap<ChannelId, Channel>,
    members: BTreeMap<(ChannelId, UserId), ChannelMember>,
    dms: HashMap<DmThreadId, DmThread>,
    messages: HashMap<MessageId, Message>,
    next_seq: i64,
    attachments: HashMap<AttachmentId, Attachment>,
    reactions: BTreeMap<(MessageId, UserId, String), Reaction>,
    receipts: HashMap<(TenantId, UserId, ConversationTarget), ReadReceipt>,
}

impl State {
    fn visible_message(&self, tenant_id: TenantId, message_id: MessageId) -> Option<&Message> {
        self.messages
            .get(&message_id)
            .filter(|message| message.tenant_id == tenant_id)
    }

    fn sorted_by_seq<'a>(messages: impl Iterator<Item = &'a Message>) -> Vec<Message> {
        let mut list: Vec<Message> = messages.cloned().collect();
        list.sort_by_key(|message| message.seq);
        list
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    state: RwLock<State>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记租户用户（真实部署中由外部用户系统维护）
    pub async fn add_tenant_user(&self, user: TenantUser) {
        let mut state = self.state.write().await;
        state.users.insert((user.tenant_id, user.user_id), user);
    }
}

#[async_trait]
impl TenantDirectory for InMemoryConversationStore {
    async fn find_tenant_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<TenantUser>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.users.get(&(tenant_id, user_id)).cloned())
    }

    async fn find_tenant_users(
        &self,
        tenant_id: TenantId,
        user_ids: &[UserId],
    ) -> Result<Vec<TenantUser>, RepositoryError> {
        let state = self.state.read().await;
        let unique: HashSet<UserId> = user_ids.iter().copied().collect();
        Ok(unique
            .into_iter()
            .filter_map(|user_id| state.users.get(&(tenant_id, user_id)).cloned())
            .collect())
    }
}

#[async_trait]
impl ChannelRepository for InMemoryConversationStore {
    async fn create_channel_with_owner(
        &self,
        channel: Channel,
        owner: ChannelMember,
    ) -> Result<Channel, RepositoryError> {
        let mut state = self.state.write().await;
        if state.channels.contains_key(&channel.id) {
            return Err(RepositoryError::Conflict);
        }
        state.members.insert((owner.channel_id, owner.user_id), owner);
        state.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    async fn find_channel(
        &self,
        tenant_id: TenantId,
        channel_id: ChannelId,
    ) -> Result<Option<Channel>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .channels
            .get(&channel_id)
            .filter(|channel| channel.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_visible_channels(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<Channel>, RepositoryError> {
        let state = self.state.read().await;
        let mut channels: Vec<Channel> = state
            .channels
            .values()
            .filter(|channel| channel.tenant_id == tenant_id)
            .filter(|channel| {
                !channel.is_private || state.members.contains_key(&(channel.id, user_id))
            })
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(channels)
    }

    async fn list_joined_channels(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<Channel>, RepositoryError> {
        let state = self.state.read().await;
        let mut channels: Vec<Channel> = state
            .channels
            .values()
            .filter(|channel| channel.tenant_id == tenant_id)
            .filter(|channel| state.members.contains_key(&(channel.id, user_id)))
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(channels)
    }
}

#[async_trait]
impl ChannelMemberRepository for InMemoryConversationStore {
    async fn find_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<ChannelMember>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.members.get(&(channel_id, user_id)).cloned())
    }

    async fn insert_member(&self, member: ChannelMember) -> Result<ChannelMember, RepositoryError> {
        let mut state = self.state.write().await;
        let key = (member.channel_id, member.user_id);
        if state.members.contains_key(&key) {
            return Err(RepositoryError::Conflict);
        }
        state.members.insert(key, member.clone());
        Ok(member)
    }

    async fn remove_member_unless_last(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<MemberRemoval, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.members.contains_key(&(channel_id, user_id)) {
            return Ok(MemberRemoval::NotMember);
        }
        let remaining = state
            .members
            .range((channel_id, UserId::new(uuid::Uuid::nil()))..)
            .take_while(|((id, _), _)| *id == channel_id)
            .count();
        if remaining <= 1 {
            return Ok(MemberRemoval::LastMember);
        }
        state.members.remove(&(channel_id, user_id));
        Ok(MemberRemoval::Removed)
    }

    async fn list_members(&self, channel_id: ChannelId) -> Result<Vec<ChannelMember>, RepositoryError> {
        let state = self.state.read().await;
        let mut members: Vec<ChannelMember> = state
            .members
            .values()
            .filter(|member| member.channel_id == channel_id)
            .cloned()
            .collect();
        members.sort_by_key(|member| member.joined_at);
        Ok(members)
    }
}

#[async_trait]
impl DmThreadRepository for InMemoryConversationStore {
    async fn find_dm_by_members(
        &self,
        tenant_id: TenantId,
        member_key: &str,
    ) -> Result<Option<DmThread>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .dms
            .values()
            .find(|thread| thread.tenant_id == tenant_id && thread.member_key == member_key)
            .cloned())
    }

    async fn create_dm(&self, thread: DmThread) -> Result<DmThread, RepositoryError> {
        let mut state = self.state.write().await;
        let duplicate = state.dms.values().any(|existing| {
            existing.tenant_id == thread.tenant_id && existing.member_key == thread.member_key
        });
        if duplicate || state.dms.contains_key(&thread.id) {
            return Err(RepositoryError::Conflict);
        }
        state.dms.insert(thread.id, thread.clone());
        Ok(thread)
    }

    async fn find_dm(
        &self,
        tenant_id: TenantId,
        dm_thread_id: DmThreadId,
    ) -> Result<Option<DmThread>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .dms
            .get(&dm_thread_id)
            .filter(|thread| thread.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_dms_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<DmThread>, RepositoryError> {
        let state = self.state.read().await;
        let mut threads: Vec<DmThread> = state
            .dms
            .values()
            .filter(|thread| thread.tenant_id == tenant_id && thread.has_member(user_id))
            .cloned()
            .collect();
        threads.sort_by_key(|thread| thread.created_at);
        Ok(threads)
    }
}

#[async_trait]
impl MessageRepository for InMemoryConversationStore {
    async fn create_message(
        &self,
        message: NewMessage,
        attachment_ids: &[AttachmentId],
    ) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        for id in attachment_ids {
            match state.attachments.get(id) {
                Some(attachment)
                    if attachment.tenant_id == message.tenant_id
                        && attachment.message_id.is_none() => {}
                _ => return Err(RepositoryError::Conflict),
            }
        }

        state.next_seq += 1;
        let stored = Message::from_new(message, state.next_seq);
        for id in attachment_ids {
            if let Some(attachment) = state.attachments.get_mut(id) {
                attachment.message_id = Some(stored.id);
            }
        }
        state.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_message(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
    ) -> Result<Option<Message>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.visible_message(tenant_id, message_id).cloned())
    }

    async fn save_message_edit(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
        body: MessageBody,
        edited_at: Timestamp,
    ) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .get_mut(&message_id)
            .filter(|message| message.tenant_id == tenant_id)
            .ok_or(RepositoryError::NotFound)?;
        if message.is_deleted() {
            return Err(RepositoryError::Conflict);
        }
        message.body = body;
        message.edited_at = Some(edited_at);
        Ok(message.clone())
    }

    async fn mark_message_deleted(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
        deleted_at: Timestamp,
    ) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .get_mut(&message_id)
            .filter(|message| message.tenant_id == tenant_id)
            .ok_or(RepositoryError::NotFound)?;
        if message.is_deleted() {
            return Err(RepositoryError::Conflict);
        }
        message.deleted_at = Some(deleted_at);
        Ok(message.clone())
    }

    async fn list_messages(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let all = State::sorted_by_seq(state.messages.values().filter(|message| {
            message.tenant_id == tenant_id
                && message.target == target
                && !message.is_reply()
                && message.archived_at.is_none()
        }));
        let limit = query.limit as usize;
        let page = match query.cursor {
            HistoryCursor::Latest => {
                let skip = all.len().saturating_sub(limit);
                all.into_iter().skip(skip).collect()
            }
            HistoryCursor::Before(seq) => {
                let older: Vec<Message> = all.into_iter().filter(|m| m.seq < seq).collect();
                let skip = older.len().saturating_sub(limit);
                older.into_iter().skip(skip).collect()
            }
            HistoryCursor::After(seq) => all
                .into_iter()
                .filter(|m| m.seq > seq)
                .take(limit)
                .collect(),
        };
        Ok(page)
    }

    async fn list_replies(
        &self,
        tenant_id: TenantId,
        parent_message_id: MessageId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let replies = State::sorted_by_seq(state.messages.values().filter(|message| {
            message.tenant_id == tenant_id
                && message.parent_message_id == Some(parent_message_id)
                && message.archived_at.is_none()
        }));
        Ok(replies.into_iter().take(limit as usize).collect())
    }

    async fn thread_summaries(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        parent_message_ids: &[MessageId],
    ) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let state = self.state.read().await;
        let wanted: HashSet<MessageId> = parent_message_ids.iter().copied().collect();
        let mut summaries: HashMap<MessageId, ThreadSummary> = HashMap::new();
        let replies = State::sorted_by_seq(state.messages.values().filter(|message| {
            message.tenant_id == tenant_id
                && message.target == target
                && message.deleted_at.is_none()
                && message.archived_at.is_none()
                && message
                    .parent_message_id
                    .is_some_and(|parent| wanted.contains(&parent))
        }));
        for reply in replies {
            let Some(parent) = reply.parent_message_id else {
                continue;
            };
            let summary = summaries
                .entry(parent)
                .or_insert_with(|| ThreadSummary::empty(parent));
            summary.reply_count += 1;
            summary.last_reply_at = Some(reply.created_at);
            summary.last_reply_author_id = Some(reply.author_id);
        }
        Ok(summaries.into_values().collect())
    }

    async fn count_unread(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        user_id: UserId,
        after_seq: Option<i64>,
    ) -> Result<i64, RepositoryError> {
        let state = self.state.read().await;
        let after = after_seq.unwrap_or(0);
        let count = state
            .messages
            .values()
            .filter(|message| {
                message.tenant_id == tenant_id
                    && message.target == target
                    && message.author_id != user_id
                    && message.deleted_at.is_none()
                    && message.archived_at.is_none()
                    && message.seq > after
            })
            .count();
        Ok(count as i64)
    }

    async fn archive_created_before(
        &self,
        cutoff: Timestamp,
        archived_at: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut archived = 0;
        for message in state.messages.values_mut() {
            if message.archived_at.is_none() && message.created_at < cutoff {
                message.archived_at = Some(archived_at);
                archived += 1;
            }
        }
        Ok(archived)
    }
}

#[async_trait]
impl AttachmentRepository for InMemoryConversationStore {
    async fn create_attachment(&self, attachment: Attachment) -> Result<Attachment, RepositoryError> {
        let mut state = self.state.write().await;
        if state.attachments.contains_key(&attachment.id) {
            return Err(RepositoryError::Conflict);
        }
        state.attachments.insert(attachment.id, attachment.clone());
        Ok(attachment)
    }

    async fn find_attachments(
        &self,
        tenant_id: TenantId,
        ids: &[AttachmentId],
    ) -> Result<Vec<Attachment>, RepositoryError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.attachments.get(id))
            .filter(|attachment| attachment.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_attachments_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Attachment>, RepositoryError> {
        let state = self.state.read().await;
        let wanted: HashSet<MessageId> = message_ids.iter().copied().collect();
        let mut attachments: Vec<Attachment> = state
            .attachments
            .values()
            .filter(|attachment| attachment.message_id.is_some_and(|id| wanted.contains(&id)))
            .cloned()
            .collect();
        attachments.sort_by_key(|attachment| attachment.created_at);
        Ok(attachments)
    }
}

#[async_trait]
impl ReactionRepository for InMemoryConversationStore {
    async fn insert_reaction(&self, reaction: Reaction) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let key = (
            reaction.message_id,
            reaction.user_id,
            reaction.emoji.as_str().to_owned(),
        );
        if state.reactions.contains_key(&key) {
            return Ok(false);
        }
        state.reactions.insert(key, reaction);
        Ok(true)
    }

    async fn delete_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &Emoji,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        Ok(state
            .reactions
            .remove(&(message_id, user_id, emoji.as_str().to_owned()))
            .is_some())
    }

    async fn list_reactions_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Reaction>, RepositoryError> {
        let state = self.state.read().await;
        let wanted: HashSet<MessageId> = message_ids.iter().copied().collect();
        let mut reactions: Vec<Reaction> = state
            .reactions
            .values()
            .filter(|reaction| wanted.contains(&reaction.message_id))
            .cloned()
            .collect();
        reactions.sort_by_key(|reaction| reaction.created_at);
        Ok(reactions)
    }
}

#[async_trait]
impl ReadReceiptRepository for InMemoryConversationStore {
    async fn upsert_receipt(&self, receipt: ReadReceipt) -> Result<ReadReceipt, RepositoryError> {
        let mut state = self.state.write().await;
        state.receipts.insert(
            (receipt.tenant_id, receipt.user_id, receipt.target),
            receipt.clone(),
        );
        Ok(receipt)
    }

    async fn find_receipt(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        target: ConversationTarget,
    ) -> Result<Option<ReadReceipt>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.receipts.get(&(tenant_id, user_id, target)).cloned())
    }

    async fn list_receipts_for_target(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
    ) -> Result<Vec<ReadReceipt>, RepositoryError> {
        let state = self.state.read().await;
        let mut receipts: Vec<ReadReceipt> = state
            .receipts
            .values()
            .filter(|receipt| receipt.tenant_id == tenant_id && receipt.target == target)
            .cloned()
            .collect();
        receipts.sort_by_key(|receipt| receipt.last_read_at);
        Ok(receipts)
    }
}
