use serde::{Deserialize, Serialize};

use crate::conversation::ConversationTarget;
use crate::value_objects::{MessageId, TenantId, Timestamp, UserId};

/// 每个 (tenant, user, target) 一条，upsert 更新。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub target: ConversationTarget,
    pub last_read_message_id: MessageId,
    pub last_read_at: Timestamp,
}
