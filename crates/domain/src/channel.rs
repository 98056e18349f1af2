use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::tenant::Actor;
use crate::value_objects::{ChannelId, ChannelName, TenantId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub tenant_id: TenantId,
    pub name: String,
    pub is_private: bool,
    pub created_by: UserId,
    pub created_at: Timestamp,
}

impl Channel {
    pub fn new(
        id: ChannelId,
        tenant_id: TenantId,
        name: ChannelName,
        is_private: bool,
        created_by: UserId,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            tenant_id,
            name: name.as_str().to_owned(),
            is_private,
            created_by,
            created_at,
        }
    }

    /// 创建者、频道 owner 以及租户管理员可以管理其他成员。
    pub fn can_manage_members(&self, actor: &Actor, actor_membership: Option<&ChannelMember>) -> bool {
        actor.is_tenant_admin()
            || self.created_by == actor.user_id
            || actor_membership.is_some_and(|member| member.role == ChannelRole::Owner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Owner,
    Member,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Owner => "owner",
            ChannelRole::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "owner" => Ok(ChannelRole::Owner),
            "member" => Ok(ChannelRole::Member),
            other => Err(DomainError::invalid_argument(
                "channel_role",
                format!("unknown role `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub role: ChannelRole,
    pub joined_at: Timestamp,
}

impl ChannelMember {
    pub fn new(channel_id: ChannelId, user_id: UserId, role: ChannelRole, joined_at: Timestamp) -> Self {
        Self {
            channel_id,
            user_id,
            role,
            joined_at,
        }
    }

    pub fn owner(channel: &Channel) -> Self {
        Self::new(channel.id, channel.created_by, ChannelRole::Owner, channel.created_at)
    }
}
