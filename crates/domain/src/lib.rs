//! 聊天核心领域模型
//!
//! 包含租户内的频道、私信、消息、线程、表情反应、读回执等实体，
//! 以及它们的业务不变量。本 crate 不做任何 I/O。

pub mod attachment;
pub mod channel;
pub mod conversation;
pub mod dm_thread;
pub mod errors;
pub mod message;
pub mod read_receipt;
pub mod tenant;
pub mod value_objects;

// 重新导出常用类型
pub use attachment::{sanitize_file_name, Attachment};
pub use channel::{Channel, ChannelMember, ChannelRole};
pub use conversation::{ConversationTarget, TargetType, Topic};
pub use dm_thread::{DmMemberSet, DmThread, MAX_DM_MEMBERS, MIN_DM_MEMBERS};
pub use errors::{DomainError, DomainResult, ErrorKind, RepositoryError};
pub use message::{Message, NewMessage, Reaction, ThreadSummary};
pub use read_receipt::ReadReceipt;
pub use tenant::{Actor, TenantRole, TenantUser};
pub use value_objects::*;
