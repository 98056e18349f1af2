use std::sync::Arc;

use application::{
    BroadcastRouter, ChannelService, ChatService, LocalEventHub, PresenceTracker, UploadService,
};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub channel_service: Arc<ChannelService>,
    pub upload_service: Arc<UploadService>,
    pub presence: Arc<PresenceTracker>,
    pub broadcaster: BroadcastRouter,
    /// WebSocket 连接从这里订阅事件
    pub hub: Arc<LocalEventHub>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(
        chat_service: Arc<ChatService>,
        channel_service: Arc<ChannelService>,
        upload_service: Arc<UploadService>,
        presence: Arc<PresenceTracker>,
        broadcaster: BroadcastRouter,
        hub: Arc<LocalEventHub>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            chat_service,
            channel_service,
            upload_service,
            presence,
            broadcaster,
            hub,
            jwt_service,
        }
    }
}
