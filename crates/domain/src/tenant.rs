use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Admin,
    Member,
}

impl TenantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantRole::Admin => "admin",
            TenantRole::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "admin" => Ok(TenantRole::Admin),
            "member" => Ok(TenantRole::Member),
            other => Err(DomainError::invalid_argument(
                "tenant_role",
                format!("unknown role `{other}`"),
            )),
        }
    }
}

/// 租户目录中的用户，由外部的用户/租户系统维护。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub display_name: String,
    pub role: TenantRole,
}

/// 已认证请求的调用者，由认证/租户中间件解析得到。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: TenantRole,
}

impl Actor {
    pub fn new(tenant_id: TenantId, user_id: UserId, role: TenantRole) -> Self {
        Self {
            tenant_id,
            user_id,
            role,
        }
    }

    pub fn member(tenant_id: TenantId, user_id: UserId) -> Self {
        Self::new(tenant_id, user_id, TenantRole::Member)
    }

    pub fn is_tenant_admin(&self) -> bool {
        matches!(self.role, TenantRole::Admin)
    }
}
