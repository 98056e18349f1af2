//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务，处理成员关系校验、限流、
//! 以及对外部适配器（会话存储、对象存储、事件广播、在线状态存储）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod events;
pub mod local_broadcast;
pub mod memory;
pub mod object_storage;
pub mod presence;
pub mod rate_limiter;
pub mod repository;
pub mod services;

pub use broadcaster::{BroadcastError, BroadcastRouter, EventEnvelope, EventPublisher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ApplicationError, ApplicationResult};
pub use events::ChatEvent;
pub use local_broadcast::{LocalEventHub, TopicSubscription};
pub use memory::InMemoryConversationStore;
pub use object_storage::{ObjectStorage, ObjectStorageError, StoredObject};
pub use presence::{
    PresencePayload, PresencePolicy, PresenceRecord, PresenceStatus, PresenceStore,
    PresenceTracker,
};
pub use rate_limiter::{RateLimitError, RateLimitPolicy, SendRateLimiter, SlidingWindowRateLimiter};
pub use repository::ConversationStore;
pub use services::{
    ChannelService, ChannelServiceDependencies, ChatService, ChatServiceDependencies, ChatSettings,
    ConversationAccess, CreateChannelRequest, HistoryRequest, SendMessageRequest, UploadPolicy,
    UploadRequest, UploadService, UploadServiceDependencies,
};
