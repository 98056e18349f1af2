use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{DmThreadId, TenantId, Timestamp, UserId};

pub const MIN_DM_MEMBERS: usize = 2;
pub const MAX_DM_MEMBERS: usize = 11;

/// 规范化后的私信成员集合：去重、排序、包含发起人。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmMemberSet(Vec<UserId>);

impl DmMemberSet {
    pub fn normalize(
        initiator: UserId,
        others: impl IntoIterator<Item = UserId>,
    ) -> Result<Self, DomainError> {
        let mut members: BTreeSet<UserId> = others.into_iter().collect();
        members.insert(initiator);

        if members.len() < MIN_DM_MEMBERS {
            return Err(DomainError::invalid_argument(
                "member_ids",
                "a direct message needs at least one other member",
            ));
        }
        if members.len() > MAX_DM_MEMBERS {
            return Err(DomainError::invalid_argument(
                "member_ids",
                format!("a direct message allows at most {MAX_DM_MEMBERS} members"),
            ));
        }
        Ok(Self(members.into_iter().collect()))
    }

    /// 成员集合的唯一键，存储层用它做 (tenant, key) 唯一约束。
    pub fn key(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn members(&self) -> &[UserId] {
        &self.0
    }

    pub fn into_members(self) -> Vec<UserId> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmThread {
    pub id: DmThreadId,
    pub tenant_id: TenantId,
    pub member_ids: Vec<UserId>,
    pub member_key: String,
    pub created_by: UserId,
    pub created_at: Timestamp,
}

impl DmThread {
    pub fn new(
        id: DmThreadId,
        tenant_id: TenantId,
        members: DmMemberSet,
        created_by: UserId,
        created_at: Timestamp,
    ) -> Self {
        let member_key = members.key();
        Self {
            id,
            tenant_id,
            member_ids: members.into_members(),
            member_key,
            created_by,
            created_at,
        }
    }

    pub fn has_member(&self, user_id: UserId) -> bool {
        self.member_ids.contains(&user_id)
    }
}
