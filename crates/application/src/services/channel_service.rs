use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    Actor, Channel, ChannelId, ChannelMember, ChannelName, ChannelRole, ConversationTarget,
    DmMemberSet, DmThread, DmThreadId, DomainError, RepositoryError, UserId,
};

use crate::{
    broadcaster::BroadcastRouter,
    clock::Clock,
    dto::{ChannelDto, ChannelMemberDto, DmThreadDto, OpenDmDto},
    error::ApplicationError,
    events::{ChannelMemberPayload, ChatEvent},
    repository::{ConversationStore, MemberRemoval},
    services::conversation::ConversationAccess,
};

#[derive(Debug, Clone)]
pub struct CreateChannelRequest {
    pub name: String,
    pub is_private: bool,
}

pub struct ChannelServiceDependencies {
    pub store: Arc<dyn ConversationStore>,
    pub broadcaster: BroadcastRouter,
    pub clock: Arc<dyn Clock>,
}

/// 频道与私信的成员管理
pub struct ChannelService {
    deps: ChannelServiceDependencies,
    access: ConversationAccess,
}

impl ChannelService {
    pub fn new(deps: ChannelServiceDependencies) -> Self {
        let access = ConversationAccess::new(deps.store.clone());
        Self { deps, access }
    }

    /// 创建者成为 owner 成员
    pub async fn create_channel(
        &self,
        actor: &Actor,
        request: CreateChannelRequest,
    ) -> Result<ChannelDto, ApplicationError> {
        let name = ChannelName::parse(request.name)?;
        let channel = Channel::new(
            ChannelId::generate(),
            actor.tenant_id,
            name,
            request.is_private,
            actor.user_id,
            self.deps.clock.now(),
        );
        let owner = ChannelMember::owner(&channel);
        let channel = self
            .deps
            .store
            .create_channel_with_owner(channel, owner)
            .await?;

        tracing::info!(
            tenant_id = %actor.tenant_id,
            channel_id = %channel.id,
            is_private = channel.is_private,
            "频道已创建"
        );

        let dto = ChannelDto::from(channel);
        if !dto.is_private {
            self.deps
                .broadcaster
                .emit_to_tenant(actor.tenant_id, ChatEvent::ChannelCreated(dto.clone()))
                .await;
        }
        Ok(dto)
    }

    pub async fn list_visible_channels(&self, actor: &Actor) -> Result<Vec<ChannelDto>, ApplicationError> {
        Ok(self
            .deps
            .store
            .list_visible_channels(actor.tenant_id, actor.user_id)
            .await?
            .into_iter()
            .map(ChannelDto::from)
            .collect())
    }

    pub async fn list_joined_channels(&self, actor: &Actor) -> Result<Vec<ChannelDto>, ApplicationError> {
        Ok(self
            .deps
            .store
            .list_joined_channels(actor.tenant_id, actor.user_id)
            .await?
            .into_iter()
            .map(ChannelDto::from)
            .collect())
    }

    /// 只能自行加入公开频道
    pub async fn join_channel(
        &self,
        actor: &Actor,
        channel_id: ChannelId,
    ) -> Result<ChannelMemberDto, ApplicationError> {
        let channel = self.find_channel(actor, channel_id).await?;
        if channel.is_private {
            return Err(DomainError::PrivateChannel.into());
        }
        let member = ChannelMember::new(
            channel.id,
            actor.user_id,
            ChannelRole::Member,
            self.deps.clock.now(),
        );
        self.insert_member(actor, &channel, member).await
    }

    pub async fn leave_channel(
        &self,
        actor: &Actor,
        channel_id: ChannelId,
    ) -> Result<(), ApplicationError> {
        let channel = self.find_channel(actor, channel_id).await?;
        self.remove(actor, &channel, actor.user_id).await
    }

    /// 频道 owner、创建者或租户管理员可以添加成员
    pub async fn add_member(
        &self,
        actor: &Actor,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<ChannelMemberDto, ApplicationError> {
        let channel = self.find_channel(actor, channel_id).await?;
        self.ensure_can_manage(actor, &channel).await?;
        self.deps
            .store
            .find_tenant_user(actor.tenant_id, user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        let member = ChannelMember::new(
            channel.id,
            user_id,
            ChannelRole::Member,
            self.deps.clock.now(),
        );
        self.insert_member(actor, &channel, member).await
    }

    /// 移除自己等同于离开
    pub async fn remove_member(
        &self,
        actor: &Actor,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let channel = self.find_channel(actor, channel_id).await?;
        if user_id != actor.user_id {
            self.ensure_can_manage(actor, &channel).await?;
        }
        self.remove(actor, &channel, user_id).await
    }

    pub async fn list_members(
        &self,
        actor: &Actor,
        channel_id: ChannelId,
    ) -> Result<Vec<ChannelMemberDto>, ApplicationError> {
        self.access
            .resolve(actor, ConversationTarget::Channel(channel_id))
            .await?;
        let members = self.deps.store.list_members(channel_id).await?;
        let user_ids: Vec<UserId> = members.iter().map(|member| member.user_id).collect();
        let mut names: HashMap<UserId, String> = self
            .deps
            .store
            .find_tenant_users(actor.tenant_id, &user_ids)
            .await?
            .into_iter()
            .map(|user| (user.user_id, user.display_name))
            .collect();
        Ok(members
            .into_iter()
            .map(|member| {
                let name = names.remove(&member.user_id);
                ChannelMemberDto::new(member, name)
            })
            .collect())
    }

    /// 按规范化的成员集合查找，不存在时创建；并发创建时以先写入者为准
    pub async fn open_dm(
        &self,
        actor: &Actor,
        member_ids: Vec<UserId>,
    ) -> Result<OpenDmDto, ApplicationError> {
        let members = DmMemberSet::normalize(actor.user_id, member_ids)?;
        let known = self
            .deps
            .store
            .find_tenant_users(actor.tenant_id, members.members())
            .await?;
        if known.len() != members.members().len() {
            return Err(DomainError::UserNotFound.into());
        }

        let key = members.key();
        if let Some(existing) = self
            .deps
            .store
            .find_dm_by_members(actor.tenant_id, &key)
            .await?
        {
            return Ok(OpenDmDto {
                thread: existing.into(),
                created: false,
            });
        }

        let thread = DmThread::new(
            DmThreadId::generate(),
            actor.tenant_id,
            members,
            actor.user_id,
            self.deps.clock.now(),
        );
        let thread = match self.deps.store.create_dm(thread).await {
            Ok(thread) => thread,
            Err(RepositoryError::Conflict) => {
                let existing = self
                    .deps
                    .store
                    .find_dm_by_members(actor.tenant_id, &key)
                    .await?
                    .ok_or(RepositoryError::Conflict)?;
                return Ok(OpenDmDto {
                    thread: existing.into(),
                    created: false,
                });
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(
            tenant_id = %actor.tenant_id,
            dm_thread_id = %thread.id,
            members = thread.member_ids.len(),
            "私信会话已创建"
        );

        let dto = DmThreadDto::from(thread);
        for member_id in &dto.member_ids {
            self.deps
                .broadcaster
                .emit_to_user(actor.tenant_id, *member_id, ChatEvent::DmThreadCreated(dto.clone()))
                .await;
        }
        Ok(OpenDmDto {
            thread: dto,
            created: true,
        })
    }

    pub async fn list_dms(&self, actor: &Actor) -> Result<Vec<DmThreadDto>, ApplicationError> {
        Ok(self
            .deps
            .store
            .list_dms_for_user(actor.tenant_id, actor.user_id)
            .await?
            .into_iter()
            .map(DmThreadDto::from)
            .collect())
    }

    async fn find_channel(&self, actor: &Actor, channel_id: ChannelId) -> Result<Channel, ApplicationError> {
        Ok(self
            .deps
            .store
            .find_channel(actor.tenant_id, channel_id)
            .await?
            .ok_or(DomainError::ChannelNotFound)?)
    }

    async fn ensure_can_manage(&self, actor: &Actor, channel: &Channel) -> Result<(), ApplicationError> {
        let membership = self.deps.store.find_member(channel.id, actor.user_id).await?;
        if !channel.can_manage_members(actor, membership.as_ref()) {
            return Err(DomainError::InsufficientPermissions.into());
        }
        Ok(())
    }

    async fn insert_member(
        &self,
        actor: &Actor,
        channel: &Channel,
        member: ChannelMember,
    ) -> Result<ChannelMemberDto, ApplicationError> {
        let member = match self.deps.store.insert_member(member).await {
            Ok(member) => member,
            Err(RepositoryError::Conflict) => return Err(DomainError::AlreadyChannelMember.into()),
            Err(err) => return Err(err.into()),
        };

        let name = self
            .deps
            .store
            .find_tenant_user(actor.tenant_id, member.user_id)
            .await?
            .map(|user| user.display_name);
        let payload = ChannelMemberPayload {
            channel_id: channel.id,
            user_id: member.user_id,
            role: member.role,
            actor_id: actor.user_id,
        };
        self.emit_membership(actor, channel, member.user_id, ChatEvent::ChannelMemberAdded(payload))
            .await;
        Ok(ChannelMemberDto::new(member, name))
    }

    async fn remove(&self, actor: &Actor, channel: &Channel, user_id: UserId) -> Result<(), ApplicationError> {
        let existing = self.deps.store.find_member(channel.id, user_id).await?;
        match self
            .deps
            .store
            .remove_member_unless_last(channel.id, user_id)
            .await?
        {
            MemberRemoval::Removed => {}
            MemberRemoval::NotMember => return Err(DomainError::NotChannelMember.into()),
            MemberRemoval::LastMember => return Err(DomainError::LastChannelMember.into()),
        }

        tracing::info!(
            tenant_id = %actor.tenant_id,
            channel_id = %channel.id,
            user_id = %user_id,
            "频道成员已移除"
        );
        let payload = ChannelMemberPayload {
            channel_id: channel.id,
            user_id,
            role: existing.map(|member| member.role).unwrap_or(ChannelRole::Member),
            actor_id: actor.user_id,
        };
        self.emit_membership(actor, channel, user_id, ChatEvent::ChannelMemberRemoved(payload))
            .await;
        Ok(())
    }

    /// 公开频道的成员变更发到租户主题；私有频道只发给频道主题和当事人
    async fn emit_membership(&self, actor: &Actor, channel: &Channel, user_id: UserId, event: ChatEvent) {
        let broadcaster = &self.deps.broadcaster;
        if channel.is_private {
            broadcaster.emit_to_chat_channel(channel.id, event.clone()).await;
            broadcaster.emit_to_user(actor.tenant_id, user_id, event).await;
        } else {
            broadcaster.emit_to_tenant(actor.tenant_id, event).await;
        }
    }
}
