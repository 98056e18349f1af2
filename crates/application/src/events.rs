//! 推送给客户端的会话事件，序列化为 `{"type": "...", "payload": {...}}`

use domain::{ChannelId, ChannelRole, ConversationTarget, MessageId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::dto::{
    ChannelDto, DmThreadDto, MessageDto, PresencePayload, ReadReceiptDto, ThreadSummaryDto,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatEvent {
    NewMessage(MessageDto),
    ThreadReplyCreated(ThreadReplyPayload),
    MessageUpdated(MessageDto),
    MessageDeleted(MessageDeletedPayload),
    MessageReaction(ReactionEventPayload),
    ConversationRead(ReadReceiptDto),
    ChannelCreated(ChannelDto),
    ChannelMemberAdded(ChannelMemberPayload),
    ChannelMemberRemoved(ChannelMemberPayload),
    DmThreadCreated(DmThreadDto),
    PresenceUpdated(PresencePayload),
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::NewMessage(_) => "NEW_MESSAGE",
            ChatEvent::ThreadReplyCreated(_) => "THREAD_REPLY_CREATED",
            ChatEvent::MessageUpdated(_) => "MESSAGE_UPDATED",
            ChatEvent::MessageDeleted(_) => "MESSAGE_DELETED",
            ChatEvent::MessageReaction(_) => "MESSAGE_REACTION",
            ChatEvent::ConversationRead(_) => "CONVERSATION_READ",
            ChatEvent::ChannelCreated(_) => "CHANNEL_CREATED",
            ChatEvent::ChannelMemberAdded(_) => "CHANNEL_MEMBER_ADDED",
            ChatEvent::ChannelMemberRemoved(_) => "CHANNEL_MEMBER_REMOVED",
            ChatEvent::DmThreadCreated(_) => "DM_THREAD_CREATED",
            ChatEvent::PresenceUpdated(_) => "PRESENCE_UPDATED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadReplyPayload {
    pub message: MessageDto,
    pub thread: ThreadSummaryDto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeletedPayload {
    pub message_id: MessageId,
    pub target: ConversationTarget,
    pub parent_message_id: Option<MessageId>,
    pub deleted_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEventPayload {
    pub message_id: MessageId,
    pub target: ConversationTarget,
    pub user_id: UserId,
    pub emoji: String,
    pub action: ReactionAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMemberPayload {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub role: ChannelRole,
    pub actor_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::PresenceStatus;

    #[test]
    fn events_serialize_with_screaming_type_tag() {
        let user_id = UserId::generate();
        let event = ChatEvent::PresenceUpdated(PresencePayload::offline(user_id));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PRESENCE_UPDATED");
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["payload"]["status"], "offline");

        let back: ChatEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(
            back,
            ChatEvent::PresenceUpdated(PresencePayload {
                status: PresenceStatus::Offline,
                ..
            })
        ));
    }
}
