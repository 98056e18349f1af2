use std::sync::Arc;

use domain::{Actor, ConversationTarget, DomainError, Topic};

use crate::error::ApplicationError;
use crate::repository::ConversationStore;

/// 访问校验通过后的会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConversation {
    pub target: ConversationTarget,
    pub topic: Topic,
}

/// 频道与私信的统一访问解析。每次调用都重新读取存储，不缓存成员关系。
#[derive(Clone)]
pub struct ConversationAccess {
    store: Arc<dyn ConversationStore>,
}

impl ConversationAccess {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// 公开频道对租户内所有成员开放；私有频道需要成员关系；私信需要在成员列表中。
    /// 会话不存在或属于其他租户时返回 NotFound。
    pub async fn resolve(
        &self,
        actor: &Actor,
        target: ConversationTarget,
    ) -> Result<ResolvedConversation, ApplicationError> {
        match target {
            ConversationTarget::Channel(channel_id) => {
                let channel = self
                    .store
                    .find_channel(actor.tenant_id, channel_id)
                    .await?
                    .ok_or(DomainError::ChannelNotFound)?;
                if channel.is_private
                    && self
                        .store
                        .find_member(channel_id, actor.user_id)
                        .await?
                        .is_none()
                {
                    return Err(DomainError::PrivateChannel.into());
                }
            }
            ConversationTarget::Dm(dm_thread_id) => {
                let thread = self
                    .store
                    .find_dm(actor.tenant_id, dm_thread_id)
                    .await?
                    .ok_or(DomainError::DmThreadNotFound)?;
                if !thread.has_member(actor.user_id) {
                    return Err(DomainError::NotDmMember.into());
                }
            }
        }

        Ok(ResolvedConversation {
            target,
            topic: target.topic(),
        })
    }
}
