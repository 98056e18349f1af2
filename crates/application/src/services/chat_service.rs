use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;
use config::ChatConfig;
use domain::{
    Actor, AttachmentId, ConversationTarget, DomainError, Emoji, Message, MessageBody, MessageId,
    NewMessage, Reaction, ReadReceipt, RepositoryError, TenantId, ThreadSummary, Timestamp, Topic,
};

use crate::{
    broadcaster::BroadcastRouter,
    clock::Clock,
    dto::{
        MessageDto, MessagePageDto, MessageRelations, ReactionResultDto, ReadReceiptDto,
        ReadStateDto, ThreadSummaryDto, UnreadCountDto,
    },
    error::ApplicationError,
    events::{
        ChatEvent, MessageDeletedPayload, ReactionAction, ReactionEventPayload, ThreadReplyPayload,
    },
    rate_limiter::{RateLimitError, SendRateLimiter},
    repository::{ConversationStore, HistoryCursor, HistoryQuery},
    services::conversation::{ConversationAccess, ResolvedConversation},
};

/// 会话引擎的可配置参数
#[derive(Debug, Clone, Copy)]
pub struct ChatSettings {
    pub edit_window: Duration,
    pub max_attachments: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub max_thread_replies: u32,
    pub retention: Option<Duration>,
}

impl From<&ChatConfig> for ChatSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            edit_window: Duration::seconds(config.edit_window_secs as i64),
            max_attachments: config.max_attachments_per_message,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
            max_thread_replies: config.max_thread_replies,
            retention: config
                .retention_days
                .map(|days| Duration::days(i64::from(days))),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub target: ConversationTarget,
    pub body: String,
    pub attachment_ids: Vec<AttachmentId>,
    pub parent_message_id: Option<MessageId>,
}

impl SendMessageRequest {
    pub fn text(target: ConversationTarget, body: impl Into<String>) -> Self {
        Self {
            target,
            body: body.into(),
            attachment_ids: Vec::new(),
            parent_message_id: None,
        }
    }

    pub fn reply_to(mut self, parent_message_id: MessageId) -> Self {
        self.parent_message_id = Some(parent_message_id);
        self
    }

    pub fn with_attachments(mut self, attachment_ids: Vec<AttachmentId>) -> Self {
        self.attachment_ids = attachment_ids;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryRequest {
    pub limit: Option<u32>,
    pub before: Option<MessageId>,
    pub after: Option<MessageId>,
}

pub struct ChatServiceDependencies {
    pub store: Arc<dyn ConversationStore>,
    pub rate_limiter: Arc<dyn SendRateLimiter>,
    pub broadcaster: BroadcastRouter,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

/// 会话引擎：校验成员关系和业务不变量，先持久化再广播
pub struct ChatService {
    deps: ChatServiceDependencies,
    access: ConversationAccess,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        let access = ConversationAccess::new(deps.store.clone());
        Self { deps, access }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.deps.settings
    }

    pub async fn send_message(
        &self,
        actor: &Actor,
        request: SendMessageRequest,
    ) -> Result<MessageDto, ApplicationError> {
        let resolved = self.access.resolve(actor, request.target).await?;
        let body = MessageBody::new(request.body)?;
        let attachment_ids = dedup_preserving_order(request.attachment_ids);
        if attachment_ids.len() > self.deps.settings.max_attachments {
            return Err(DomainError::TooManyAttachments {
                max: self.deps.settings.max_attachments,
            }
            .into());
        }

        self.ensure_attachments_linkable(actor.tenant_id, &attachment_ids)
            .await?;

        let parent = match request.parent_message_id {
            Some(parent_id) => {
                let parent = self
                    .deps
                    .store
                    .find_message(actor.tenant_id, parent_id)
                    .await?
                    .filter(|message| message.archived_at.is_none())
                    .ok_or(DomainError::ParentNotInConversation)?;
                parent.ensure_can_parent(resolved.target)?;
                Some(parent)
            }
            None => None,
        };

        // 校验全部通过后才占用限流额度，且在任何写入之前
        if let Err(err) = self
            .deps
            .rate_limiter
            .check_and_record(actor.tenant_id, actor.user_id)
            .await
        {
            if let RateLimitError::Exceeded { retry_after_ms, .. } = &err {
                tracing::info!(
                    tenant_id = %actor.tenant_id,
                    user_id = %actor.user_id,
                    retry_after_ms,
                    "发送频率超限"
                );
            }
            return Err(err.into());
        }

        let new_message = NewMessage {
            id: MessageId::generate(),
            tenant_id: actor.tenant_id,
            target: resolved.target,
            author_id: actor.user_id,
            body,
            parent_message_id: parent.as_ref().map(|message| message.id),
            created_at: self.deps.clock.now(),
        };
        let message = self
            .deps
            .store
            .create_message(new_message, &attachment_ids)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => ApplicationError::from(
                    DomainError::attachment_unavailable("attachment was linked to another message"),
                ),
                other => {
                    tracing::error!(
                        tenant_id = %actor.tenant_id,
                        target = %resolved.target,
                        error = %other,
                        "消息持久化失败"
                    );
                    other.into()
                }
            })?;

        tracing::info!(
            tenant_id = %actor.tenant_id,
            message_id = %message.id,
            target = %resolved.target,
            seq = message.seq,
            "消息已发送"
        );

        let dto = self.hydrate_one(actor.tenant_id, message).await?;
        match parent {
            Some(parent) => {
                let thread = self
                    .thread_summary(actor.tenant_id, resolved.target, parent.id)
                    .await?;
                self.deps
                    .broadcaster
                    .emit_to_conversation(
                        resolved.target,
                        ChatEvent::ThreadReplyCreated(ThreadReplyPayload {
                            message: dto.clone(),
                            thread,
                        }),
                    )
                    .await;
            }
            None => {
                self.deps
                    .broadcaster
                    .emit_to_conversation(resolved.target, ChatEvent::NewMessage(dto.clone()))
                    .await;
            }
        }
        Ok(dto)
    }

    pub async fn edit_message(
        &self,
        actor: &Actor,
        message_id: MessageId,
        body: String,
    ) -> Result<MessageDto, ApplicationError> {
        let (mut message, resolved) = self.load_accessible_message(actor, message_id).await?;
        let now = self.deps.clock.now();
        message.edit(
            actor.user_id,
            MessageBody::new(body)?,
            now,
            self.deps.settings.edit_window,
        )?;

        let updated = self
            .deps
            .store
            .save_message_edit(actor.tenant_id, message_id, message.body, now)
            .await
            .map_err(conflict_means_deleted)?;

        let dto = self.hydrate_one(actor.tenant_id, updated).await?;
        self.deps
            .broadcaster
            .emit_to_conversation(resolved.target, ChatEvent::MessageUpdated(dto.clone()))
            .await;
        Ok(dto)
    }

    /// 软删除，只允许作者本人
    pub async fn delete_message(
        &self,
        actor: &Actor,
        message_id: MessageId,
    ) -> Result<MessageDeletedPayload, ApplicationError> {
        let (mut message, resolved) = self.load_accessible_message(actor, message_id).await?;
        let now = self.deps.clock.now();
        message.soft_delete(actor.user_id, now)?;

        let deleted = self
            .deps
            .store
            .mark_message_deleted(actor.tenant_id, message_id, now)
            .await
            .map_err(conflict_means_deleted)?;

        let payload = MessageDeletedPayload {
            message_id: deleted.id,
            target: deleted.target,
            parent_message_id: deleted.parent_message_id,
            deleted_at: deleted.deleted_at.unwrap_or(now),
        };
        tracing::info!(tenant_id = %actor.tenant_id, message_id = %message_id, "消息已删除");
        self.deps
            .broadcaster
            .emit_to_conversation(resolved.target, ChatEvent::MessageDeleted(payload.clone()))
            .await;
        Ok(payload)
    }

    pub async fn add_reaction(
        &self,
        actor: &Actor,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<ReactionResultDto, ApplicationError> {
        let emoji = Emoji::parse(emoji)?;
        let (message, resolved) = self.load_accessible_message(actor, message_id).await?;
        message.ensure_reactable()?;

        let created = self
            .deps
            .store
            .insert_reaction(Reaction {
                message_id,
                user_id: actor.user_id,
                emoji: emoji.clone(),
                created_at: self.deps.clock.now(),
            })
            .await?;

        if created {
            self.emit_reaction(actor, &resolved, message_id, &emoji, ReactionAction::Add)
                .await;
        }
        Ok(ReactionResultDto {
            message_id,
            user_id: actor.user_id,
            emoji: emoji.as_str().to_owned(),
            created,
        })
    }

    /// 移除不存在的表情反应返回 NotFound
    pub async fn remove_reaction(
        &self,
        actor: &Actor,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), ApplicationError> {
        let emoji = Emoji::parse(emoji)?;
        let (_, resolved) = self.load_accessible_message(actor, message_id).await?;

        let removed = self
            .deps
            .store
            .delete_reaction(message_id, actor.user_id, &emoji)
            .await?;
        if !removed {
            return Err(DomainError::ReactionNotFound.into());
        }

        self.emit_reaction(actor, &resolved, message_id, &emoji, ReactionAction::Remove)
            .await;
        Ok(())
    }

    pub async fn mark_read(
        &self,
        actor: &Actor,
        target: ConversationTarget,
        last_read_message_id: MessageId,
    ) -> Result<ReadReceiptDto, ApplicationError> {
        let resolved = self.access.resolve(actor, target).await?;
        let message = self
            .deps
            .store
            .find_message(actor.tenant_id, last_read_message_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;
        if message.target != resolved.target {
            return Err(DomainError::ReadTargetMismatch.into());
        }

        let receipt = self
            .deps
            .store
            .upsert_receipt(ReadReceipt {
                tenant_id: actor.tenant_id,
                user_id: actor.user_id,
                target: resolved.target,
                last_read_message_id,
                last_read_at: self.deps.clock.now(),
            })
            .await?;

        let dto = ReadReceiptDto::from(receipt);
        self.deps
            .broadcaster
            .emit_to_conversation(resolved.target, ChatEvent::ConversationRead(dto.clone()))
            .await;
        Ok(dto)
    }

    /// 所有成员的读回执，加上调用者自己的未读数
    pub async fn get_read_state(
        &self,
        actor: &Actor,
        target: ConversationTarget,
    ) -> Result<ReadStateDto, ApplicationError> {
        let resolved = self.access.resolve(actor, target).await?;
        let receipts = self
            .deps
            .store
            .list_receipts_for_target(actor.tenant_id, resolved.target)
            .await?
            .into_iter()
            .map(ReadReceiptDto::from)
            .collect();
        let unread_count = self.unread_for(actor, resolved.target).await?;
        Ok(ReadStateDto {
            target: resolved.target,
            receipts,
            unread_count,
        })
    }

    /// 已加入的频道和所在私信的未读数
    pub async fn unread_counts(&self, actor: &Actor) -> Result<Vec<UnreadCountDto>, ApplicationError> {
        let channels = self
            .deps
            .store
            .list_joined_channels(actor.tenant_id, actor.user_id)
            .await?;
        let dms = self
            .deps
            .store
            .list_dms_for_user(actor.tenant_id, actor.user_id)
            .await?;

        let targets = channels
            .into_iter()
            .map(|channel| ConversationTarget::Channel(channel.id))
            .chain(dms.into_iter().map(|thread| ConversationTarget::Dm(thread.id)));

        let mut counts = Vec::new();
        for target in targets {
            let unread_count = self.unread_for(actor, target).await?;
            counts.push(UnreadCountDto {
                target,
                unread_count,
            });
        }
        Ok(counts)
    }

    /// 按创建顺序返回一级回复
    pub async fn get_thread_replies(
        &self,
        actor: &Actor,
        parent_message_id: MessageId,
        limit: Option<u32>,
    ) -> Result<Vec<MessageDto>, ApplicationError> {
        let (parent, _) = self
            .load_accessible_message(actor, parent_message_id)
            .await?;
        if parent.is_reply() {
            return Err(DomainError::ThreadDepthExceeded.into());
        }

        let max = self.deps.settings.max_thread_replies;
        let limit = limit.unwrap_or(max).min(max).max(1);
        let replies = self
            .deps
            .store
            .list_replies(actor.tenant_id, parent.id, limit)
            .await?;
        self.hydrate(actor.tenant_id, replies).await
    }

    /// 批量计算线程汇总；没有回复的父消息返回零计数
    pub async fn compute_thread_summaries(
        &self,
        actor: &Actor,
        target: ConversationTarget,
        parent_message_ids: &[MessageId],
    ) -> Result<Vec<ThreadSummaryDto>, ApplicationError> {
        let resolved = self.access.resolve(actor, target).await?;
        let ids = dedup_preserving_order(parent_message_ids.to_vec());
        if ids.len() > self.deps.settings.max_page_size as usize {
            return Err(DomainError::invalid_argument(
                "parent_message_ids",
                format!("at most {} ids per request", self.deps.settings.max_page_size),
            )
            .into());
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut found: HashMap<MessageId, ThreadSummary> = self
            .deps
            .store
            .thread_summaries(actor.tenant_id, resolved.target, &ids)
            .await?
            .into_iter()
            .map(|summary| (summary.parent_message_id, summary))
            .collect();
        Ok(ids
            .into_iter()
            .map(|id| {
                ThreadSummaryDto::from(
                    found
                        .remove(&id)
                        .unwrap_or_else(|| ThreadSummary::empty(id)),
                )
            })
            .collect())
    }

    /// 顶层消息分页，升序；`before` 与 `after` 互斥
    pub async fn list_messages(
        &self,
        actor: &Actor,
        target: ConversationTarget,
        request: HistoryRequest,
    ) -> Result<MessagePageDto, ApplicationError> {
        let resolved = self.access.resolve(actor, target).await?;
        let settings = &self.deps.settings;
        let limit = request
            .limit
            .unwrap_or(settings.default_page_size)
            .clamp(1, settings.max_page_size);

        let cursor = match (request.before, request.after) {
            (Some(_), Some(_)) => {
                return Err(DomainError::invalid_argument(
                    "cursor",
                    "`before` and `after` are mutually exclusive",
                )
                .into())
            }
            (Some(id), None) => HistoryCursor::Before(self.cursor_seq(actor, resolved.target, id).await?),
            (None, Some(id)) => HistoryCursor::After(self.cursor_seq(actor, resolved.target, id).await?),
            (None, None) => HistoryCursor::Latest,
        };

        // 多取一条用于判断是否还有更多
        let mut messages = self
            .deps
            .store
            .list_messages(
                actor.tenant_id,
                resolved.target,
                HistoryQuery {
                    limit: limit + 1,
                    cursor,
                },
            )
            .await?;
        let has_more = messages.len() > limit as usize;
        if has_more {
            match cursor {
                HistoryCursor::After(_) => messages.truncate(limit as usize),
                HistoryCursor::Latest | HistoryCursor::Before(_) => {
                    messages.remove(0);
                }
            }
        }

        let messages = self.hydrate(actor.tenant_id, messages).await?;
        Ok(MessagePageDto { messages, has_more })
    }

    /// 订阅时授权，返回会话主题
    pub async fn authorize_subscription(
        &self,
        actor: &Actor,
        target: ConversationTarget,
    ) -> Result<Topic, ApplicationError> {
        Ok(self.access.resolve(actor, target).await?.topic)
    }

    pub fn retention_cutoff(&self) -> Option<Timestamp> {
        self.deps
            .settings
            .retention
            .map(|retention| self.deps.clock.now() - retention)
    }

    /// 归档早于 `cutoff` 的消息，返回归档数量
    pub async fn archive_expired(&self, cutoff: Timestamp) -> Result<u64, ApplicationError> {
        let archived = self
            .deps
            .store
            .archive_created_before(cutoff, self.deps.clock.now())
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "消息归档失败");
                ApplicationError::from(err)
            })?;
        if archived > 0 {
            tracing::info!(archived, cutoff = %cutoff, "已归档过期消息");
        }
        Ok(archived)
    }

    async fn load_accessible_message(
        &self,
        actor: &Actor,
        message_id: MessageId,
    ) -> Result<(Message, ResolvedConversation), ApplicationError> {
        let message = self
            .deps
            .store
            .find_message(actor.tenant_id, message_id)
            .await?
            .filter(|message| message.archived_at.is_none())
            .ok_or(DomainError::MessageNotFound)?;
        let resolved = self.access.resolve(actor, message.target).await?;
        Ok((message, resolved))
    }

    async fn ensure_attachments_linkable(
        &self,
        tenant_id: TenantId,
        attachment_ids: &[AttachmentId],
    ) -> Result<(), ApplicationError> {
        if attachment_ids.is_empty() {
            return Ok(());
        }
        let attachments = self
            .deps
            .store
            .find_attachments(tenant_id, attachment_ids)
            .await?;
        if attachments.len() != attachment_ids.len() {
            return Err(DomainError::attachment_unavailable("attachment not found").into());
        }
        for attachment in &attachments {
            attachment.ensure_linkable(tenant_id)?;
        }
        Ok(())
    }

    async fn cursor_seq(
        &self,
        actor: &Actor,
        target: ConversationTarget,
        message_id: MessageId,
    ) -> Result<i64, ApplicationError> {
        self.deps
            .store
            .find_message(actor.tenant_id, message_id)
            .await?
            .filter(|message| message.target == target)
            .map(|message| message.seq)
            .ok_or_else(|| {
                DomainError::invalid_argument("cursor", "message is not part of this conversation")
                    .into()
            })
    }

    async fn unread_for(
        &self,
        actor: &Actor,
        target: ConversationTarget,
    ) -> Result<i64, ApplicationError> {
        let receipt = self
            .deps
            .store
            .find_receipt(actor.tenant_id, actor.user_id, target)
            .await?;
        let after_seq = match receipt {
            Some(receipt) => self
                .deps
                .store
                .find_message(actor.tenant_id, receipt.last_read_message_id)
                .await?
                .map(|message| message.seq),
            None => None,
        };
        Ok(self
            .deps
            .store
            .count_unread(actor.tenant_id, target, actor.user_id, after_seq)
            .await?)
    }

    async fn thread_summary(
        &self,
        tenant_id: TenantId,
        target: ConversationTarget,
        parent_id: MessageId,
    ) -> Result<ThreadSummaryDto, ApplicationError> {
        let summary = self
            .deps
            .store
            .thread_summaries(tenant_id, target, &[parent_id])
            .await?
            .into_iter()
            .next()
            .unwrap_or_else(|| ThreadSummary::empty(parent_id));
        Ok(summary.into())
    }

    /// 一次性加载整页消息的作者、附件、表情和线程汇总
    async fn hydrate(
        &self,
        tenant_id: TenantId,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageDto>, ApplicationError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let store = &self.deps.store;

        let author_ids: Vec<_> = messages
            .iter()
            .map(|message| message.author_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let live_ids: Vec<MessageId> = messages
            .iter()
            .filter(|message| !message.is_deleted())
            .map(|message| message.id)
            .collect();
        let mut top_level: HashMap<ConversationTarget, Vec<MessageId>> = HashMap::new();
        for message in messages.iter().filter(|message| !message.is_reply()) {
            top_level.entry(message.target).or_default().push(message.id);
        }

        let display_names = store
            .find_tenant_users(tenant_id, &author_ids)
            .await?
            .into_iter()
            .map(|user| (user.user_id, user.display_name))
            .collect();

        let mut attachments: HashMap<MessageId, Vec<_>> = HashMap::new();
        let mut reactions: HashMap<MessageId, Vec<_>> = HashMap::new();
        if !live_ids.is_empty() {
            for attachment in store.list_attachments_for_messages(&live_ids).await? {
                if let Some(message_id) = attachment.message_id {
                    attachments.entry(message_id).or_default().push(attachment);
                }
            }
            for reaction in store.list_reactions_for_messages(&live_ids).await? {
                reactions.entry(reaction.message_id).or_default().push(reaction);
            }
        }

        let mut threads = HashMap::new();
        for (target, parent_ids) in top_level {
            for summary in store.thread_summaries(tenant_id, target, &parent_ids).await? {
                threads.insert(summary.parent_message_id, summary);
            }
        }

        let relations = MessageRelations {
            display_names,
            attachments,
            reactions,
            threads,
        };
        Ok(messages
            .into_iter()
            .map(|message| MessageDto::hydrate(message, &relations))
            .collect())
    }

    async fn hydrate_one(
        &self,
        tenant_id: TenantId,
        message: Message,
    ) -> Result<MessageDto, ApplicationError> {
        self.hydrate(tenant_id, vec![message])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApplicationError::infrastructure("message hydration returned nothing"))
    }

    async fn emit_reaction(
        &self,
        actor: &Actor,
        resolved: &ResolvedConversation,
        message_id: MessageId,
        emoji: &Emoji,
        action: ReactionAction,
    ) {
        self.deps
            .broadcaster
            .emit_to_conversation(
                resolved.target,
                ChatEvent::MessageReaction(ReactionEventPayload {
                    message_id,
                    target: resolved.target,
                    user_id: actor.user_id,
                    emoji: emoji.as_str().to_owned(),
                    action,
                }),
            )
            .await;
    }
}

fn conflict_means_deleted(err: RepositoryError) -> ApplicationError {
    match err {
        RepositoryError::Conflict => DomainError::MessageDeleted.into(),
        other => other.into(),
    }
}

fn dedup_preserving_order<T: Copy + Eq + std::hash::Hash>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(*item)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::{BroadcastError, MockEventPublisher};
    use crate::clock::ManualClock;
    use crate::memory::InMemoryConversationStore;
    use crate::rate_limiter::{RateLimitPolicy, SlidingWindowRateLimiter};
    use crate::repository::ChannelRepository;
    use domain::{Channel, ChannelId, ChannelMember, ChannelName};

    async fn service_with(publisher: MockEventPublisher, max_events: u32) -> (ChatService, Actor, ConversationTarget) {
        service_with_settings(publisher, max_events, ChatSettings::default()).await
    }

    async fn service_with_settings(
        publisher: MockEventPublisher,
        max_events: u32,
        settings: ChatSettings,
    ) -> (ChatService, Actor, ConversationTarget) {
        let store = Arc::new(InMemoryConversationStore::new());
        let clock = Arc::new(ManualClock::default());
        let actor = Actor::member(TenantId::generate(), domain::UserId::generate());
        let channel = Channel::new(
            ChannelId::generate(),
            actor.tenant_id,
            ChannelName::parse("general").unwrap(),
            false,
            actor.user_id,
            clock.now(),
        );
        store
            .create_channel_with_owner(channel.clone(), ChannelMember::owner(&channel))
            .await
            .unwrap();

        let service = ChatService::new(ChatServiceDependencies {
            store,
            rate_limiter: Arc::new(SlidingWindowRateLimiter::new(RateLimitPolicy::new(
                std::time::Duration::from_secs(60),
                max_events,
            ))),
            broadcaster: BroadcastRouter::new(Arc::new(publisher), clock.clone()),
            clock,
            settings,
        });
        (service, actor, ConversationTarget::Channel(channel.id))
    }

    #[tokio::test]
    async fn broadcast_failure_does_not_fail_the_send() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_| Err(BroadcastError::failed("redis unavailable")));
        let (service, actor, target) = service_with(publisher, 10).await;

        let sent = service
            .send_message(&actor, SendMessageRequest::text(target, "still saved"))
            .await
            .unwrap();

        let page = service
            .list_messages(&actor, target, HistoryRequest::default())
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].id, sent.id);
    }

    #[tokio::test]
    async fn rate_limited_send_persists_and_broadcasts_nothing() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(1).returning(|_| Ok(()));
        let (service, actor, target) = service_with(publisher, 1).await;

        service
            .send_message(&actor, SendMessageRequest::text(target, "first"))
            .await
            .unwrap();
        let err = service
            .send_message(&actor, SendMessageRequest::text(target, "second"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), domain::ErrorKind::RateLimited);

        let page = service
            .list_messages(&actor, target, HistoryRequest::default())
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
    }

    #[tokio::test]
    async fn validation_errors_emit_nothing() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();
        let (service, actor, target) = service_with(publisher, 10).await;

        let err = service
            .send_message(&actor, SendMessageRequest::text(target, "   "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), domain::ErrorKind::BadRequest);

        let too_many = (0..11).map(|_| AttachmentId::generate()).collect();
        let err = service
            .send_message(
                &actor,
                SendMessageRequest::text(target, "files").with_attachments(too_many),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::TooManyAttachments { max: 10 })
        ));
    }

    #[tokio::test]
    async fn rejected_sends_do_not_consume_rate_limit_budget() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(2).returning(|_| Ok(()));
        let (service, actor, target) = service_with(publisher, 2).await;

        for _ in 0..2 {
            let err = service
                .send_message(
                    &actor,
                    SendMessageRequest::text(target, "orphan").reply_to(MessageId::generate()),
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind(), domain::ErrorKind::BadRequest);
        }
        let err = service
            .send_message(
                &actor,
                SendMessageRequest::text(target, "ghost file")
                    .with_attachments(vec![AttachmentId::generate()]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), domain::ErrorKind::BadRequest);

        for body in ["one", "two"] {
            service
                .send_message(&actor, SendMessageRequest::text(target, body))
                .await
                .unwrap();
        }
        let err = service
            .send_message(&actor, SendMessageRequest::text(target, "three"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), domain::ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn thread_reply_limit_tolerates_zero_cap() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().returning(|_| Ok(()));
        let settings = ChatSettings {
            max_thread_replies: 0,
            ..ChatSettings::default()
        };
        let (service, actor, target) = service_with_settings(publisher, 10, settings).await;

        let parent = service
            .send_message(&actor, SendMessageRequest::text(target, "root"))
            .await
            .unwrap();
        service
            .send_message(&actor, SendMessageRequest::text(target, "reply").reply_to(parent.id))
            .await
            .unwrap();

        let replies = service
            .get_thread_replies(&actor, parent.id, Some(50))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        assert_eq!(dedup_preserving_order(vec![3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }
}
