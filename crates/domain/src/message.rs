use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationTarget;
use crate::errors::DomainError;
use crate::value_objects::{Emoji, MessageBody, MessageId, TenantId, Timestamp, UserId};

/// 尚未持久化的消息，序列号由存储层分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub target: ConversationTarget,
    pub author_id: UserId,
    pub body: MessageBody,
    pub parent_message_id: Option<MessageId>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// 存储层的插入序号，同一毫秒内的并发发送以它为准排序。
    pub seq: i64,
    pub tenant_id: TenantId,
    pub target: ConversationTarget,
    pub author_id: UserId,
    pub body: MessageBody,
    pub parent_message_id: Option<MessageId>,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
    pub archived_at: Option<Timestamp>,
}

impl Message {
    pub fn from_new(new: NewMessage, seq: i64) -> Self {
        Self {
            id: new.id,
            seq,
            tenant_id: new.tenant_id,
            target: new.target,
            author_id: new.author_id,
            body: new.body,
            parent_message_id: new.parent_message_id,
            created_at: new.created_at,
            edited_at: None,
            deleted_at: None,
            archived_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.parent_message_id.is_some()
    }

    /// 校验该消息能否作为新回复的父消息：同一会话、自身不是回复、未被删除。
    pub fn ensure_can_parent(&self, target: ConversationTarget) -> Result<(), DomainError> {
        if self.target != target {
            return Err(DomainError::ParentNotInConversation);
        }
        if self.is_reply() {
            return Err(DomainError::ThreadDepthExceeded);
        }
        if self.is_deleted() {
            return Err(DomainError::MessageDeleted);
        }
        Ok(())
    }

    pub fn ensure_editable_by(
        &self,
        user_id: UserId,
        now: Timestamp,
        window: Duration,
    ) -> Result<(), DomainError> {
        if self.author_id != user_id {
            return Err(DomainError::NotMessageAuthor);
        }
        if self.is_deleted() {
            return Err(DomainError::MessageDeleted);
        }
        if now - self.created_at > window {
            return Err(DomainError::EditWindowExpired);
        }
        Ok(())
    }

    pub fn edit(
        &mut self,
        user_id: UserId,
        body: MessageBody,
        now: Timestamp,
        window: Duration,
    ) -> Result<(), DomainError> {
        self.ensure_editable_by(user_id, now, window)?;
        self.body = body;
        self.edited_at = Some(now);
        Ok(())
    }

    pub fn soft_delete(&mut self, user_id: UserId, now: Timestamp) -> Result<(), DomainError> {
        if self.author_id != user_id {
            return Err(DomainError::NotMessageAuthor);
        }
        if self.is_deleted() {
            return Err(DomainError::MessageDeleted);
        }
        self.deleted_at = Some(now);
        Ok(())
    }

    pub fn ensure_reactable(&self) -> Result<(), DomainError> {
        if self.is_deleted() {
            return Err(DomainError::MessageDeleted);
        }
        Ok(())
    }
}

/// 父消息的回复汇总，由存储层聚合得到，不单独持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub parent_message_id: MessageId,
    pub reply_count: i64,
    pub last_reply_at: Option<Timestamp>,
    pub last_reply_author_id: Option<UserId>,
}

impl ThreadSummary {
    pub fn empty(parent_message_id: MessageId) -> Self {
        Self {
            parent_message_id,
            reply_count: 0,
            last_reply_at: None,
            last_reply_author_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: Emoji,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::ChannelId;
    use chrono::Utc;

    fn message(author: UserId, created_at: Timestamp) -> Message {
        Message::from_new(
            NewMessage {
                id: MessageId::generate(),
                tenant_id: TenantId::generate(),
                target: ConversationTarget::Channel(ChannelId::generate()),
                author_id: author,
                body: MessageBody::new("hello").unwrap(),
                parent_message_id: None,
                created_at,
            },
            1,
        )
    }

    #[test]
    fn edit_allowed_for_author_inside_window() {
        let author = UserId::generate();
        let t0 = Utc::now();
        let mut msg = message(author, t0);

        let at = t0 + Duration::minutes(4);
        msg.edit(author, MessageBody::new("hello world").unwrap(), at, Duration::minutes(5))
            .unwrap();
        assert_eq!(msg.body.as_str(), "hello world");
        assert_eq!(msg.edited_at, Some(at));

        let later = t0 + Duration::minutes(6);
        let err = msg
            .edit(author, MessageBody::new("again").unwrap(), later, Duration::minutes(5))
            .unwrap_err();
        assert_eq!(err, DomainError::EditWindowExpired);
    }

    #[test]
    fn edit_window_boundary_is_inclusive() {
        let author = UserId::generate();
        let t0 = Utc::now();
        let msg = message(author, t0);
        assert!(msg
            .ensure_editable_by(author, t0 + Duration::minutes(5), Duration::minutes(5))
            .is_ok());
    }

    #[test]
    fn only_author_may_edit_or_delete() {
        let author = UserId::generate();
        let other = UserId::generate();
        let now = Utc::now();
        let mut msg = message(author, now);

        assert_eq!(
            msg.ensure_editable_by(other, now, Duration::minutes(5)),
            Err(DomainError::NotMessageAuthor)
        );
        assert_eq!(msg.soft_delete(other, now), Err(DomainError::NotMessageAuthor));
    }

    #[test]
    fn delete_is_not_repeatable_and_blocks_mutation() {
        let author = UserId::generate();
        let now = Utc::now();
        let mut msg = message(author, now);

        msg.soft_delete(author, now).unwrap();
        assert_eq!(msg.soft_delete(author, now), Err(DomainError::MessageDeleted));
        assert_eq!(
            msg.ensure_editable_by(author, now, Duration::minutes(5)),
            Err(DomainError::MessageDeleted)
        );
        assert_eq!(msg.ensure_reactable(), Err(DomainError::MessageDeleted));
    }

    #[test]
    fn replies_cannot_be_parents() {
        let author = UserId::generate();
        let parent = message(author, Utc::now());
        let mut reply = message(author, Utc::now());
        reply.target = parent.target;
        reply.parent_message_id = Some(parent.id);

        assert!(parent.ensure_can_parent(parent.target).is_ok());
        assert_eq!(
            reply.ensure_can_parent(parent.target),
            Err(DomainError::ThreadDepthExceeded)
        );
        assert_eq!(
            parent.ensure_can_parent(ConversationTarget::Channel(ChannelId::generate())),
            Err(DomainError::ParentNotInConversation)
        );
    }
}
