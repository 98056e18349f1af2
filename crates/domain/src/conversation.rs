//! 会话目标与广播主题
//!
//! 频道和私信在各处的分支逻辑都收敛到 `ConversationTarget`，
//! 由它决定广播主题和读回执的目标类型。

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::value_objects::{ChannelId, DmThreadId, TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Channel,
    Dm,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Channel => "channel",
            TargetType::Dm => "dm",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "channel" => Ok(TargetType::Channel),
            "dm" => Ok(TargetType::Dm),
            other => Err(DomainError::invalid_argument(
                "target_type",
                format!("expected `channel` or `dm`, got `{other}`"),
            )),
        }
    }
}

/// 消息所属的会话：频道或私信，二者必居其一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ConversationTarget {
    Channel(ChannelId),
    Dm(DmThreadId),
}

impl ConversationTarget {
    pub fn from_parts(target_type: TargetType, id: Uuid) -> Self {
        match target_type {
            TargetType::Channel => ConversationTarget::Channel(ChannelId::from(id)),
            TargetType::Dm => ConversationTarget::Dm(DmThreadId::from(id)),
        }
    }

    /// 从两个可空外键列还原，必须恰好有一个非空。
    pub fn from_columns(
        channel_id: Option<Uuid>,
        dm_thread_id: Option<Uuid>,
    ) -> Result<Self, DomainError> {
        match (channel_id, dm_thread_id) {
            (Some(id), None) => Ok(ConversationTarget::Channel(ChannelId::from(id))),
            (None, Some(id)) => Ok(ConversationTarget::Dm(DmThreadId::from(id))),
            _ => Err(DomainError::invalid_argument(
                "target",
                "message must belong to exactly one of channel or dm thread",
            )),
        }
    }

    pub fn target_type(&self) -> TargetType {
        match self {
            ConversationTarget::Channel(_) => TargetType::Channel,
            ConversationTarget::Dm(_) => TargetType::Dm,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            ConversationTarget::Channel(id) => id.0,
            ConversationTarget::Dm(id) => id.0,
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            ConversationTarget::Channel(id) => Some(*id),
            ConversationTarget::Dm(_) => None,
        }
    }

    pub fn dm_thread_id(&self) -> Option<DmThreadId> {
        match self {
            ConversationTarget::Channel(_) => None,
            ConversationTarget::Dm(id) => Some(*id),
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            ConversationTarget::Channel(id) => Topic::channel(*id),
            ConversationTarget::Dm(id) => Topic::dm(*id),
        }
    }
}

impl fmt::Display for ConversationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_type().as_str(), self.id())
    }
}

/// 广播主题。一个频道、一个私信会话、一个租户、一个用户各对应一个主题。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn channel(id: ChannelId) -> Self {
        Self(format!("chat:channel:{id}"))
    }

    pub fn dm(id: DmThreadId) -> Self {
        Self(format!("chat:dm:{id}"))
    }

    pub fn tenant(id: TenantId) -> Self {
        Self(format!("tenant:{id}"))
    }

    pub fn user(tenant_id: TenantId, user_id: UserId) -> Self {
        Self(format!("user:{tenant_id}:{user_id}"))
    }

    /// 还原跨进程传输后的主题名，只接受已知前缀。
    pub fn parse(raw: &str) -> Option<Self> {
        const PREFIXES: [&str; 4] = ["chat:channel:", "chat:dm:", "tenant:", "user:"];
        PREFIXES
            .iter()
            .any(|prefix| raw.starts_with(prefix))
            .then(|| Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_serializes_as_tagged_kind_and_id() {
        let id = ChannelId::generate();
        let json = serde_json::to_value(ConversationTarget::Channel(id)).unwrap();
        assert_eq!(json["kind"], "channel");
        assert_eq!(json["id"], id.to_string());

        let back: ConversationTarget = serde_json::from_value(json).unwrap();
        assert_eq!(back, ConversationTarget::Channel(id));
    }

    #[test]
    fn columns_must_name_exactly_one_conversation() {
        let id = Uuid::new_v4();
        assert!(ConversationTarget::from_columns(Some(id), None).is_ok());
        assert!(ConversationTarget::from_columns(None, Some(id)).is_ok());
        assert!(ConversationTarget::from_columns(Some(id), Some(id)).is_err());
        assert!(ConversationTarget::from_columns(None, None).is_err());
    }

    #[test]
    fn topics_are_distinct_per_conversation_kind() {
        let raw = Uuid::new_v4();
        let channel = ConversationTarget::Channel(ChannelId::from(raw)).topic();
        let dm = ConversationTarget::Dm(DmThreadId::from(raw)).topic();
        assert_ne!(channel, dm);
        assert_eq!(Topic::parse(channel.as_str()), Some(channel));
        assert_eq!(Topic::parse("other:thing"), None);
    }
}
