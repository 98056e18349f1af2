pub mod conversation;

mod channel_service;
mod chat_service;
mod upload_service;

pub use channel_service::{ChannelService, ChannelServiceDependencies, CreateChannelRequest};
pub use chat_service::{
    ChatService, ChatServiceDependencies, ChatSettings, HistoryRequest, SendMessageRequest,
};
pub use conversation::{ConversationAccess, ResolvedConversation};
pub use upload_service::{UploadPolicy, UploadRequest, UploadService, UploadServiceDependencies};
