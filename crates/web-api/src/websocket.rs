//! WebSocket 会话
//!
//! 连接建立时用查询参数中的令牌认证，自动订阅租户主题和个人主题；
//! 会话主题需要客户端显式订阅，订阅时做一次成员校验，之后按主题转发事件。
//! 连接、断开和心跳驱动在线状态。

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use application::{ChatEvent, EventEnvelope, PresencePayload, TopicSubscription};
use domain::{Actor, ConversationTarget, Topic};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    pub token: String,
}

/// 客户端发送的帧
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { target: ConversationTarget },
    Unsubscribe { target: ConversationTarget },
    Heartbeat,
}

/// 服务端发送的帧
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Subscribed { target: ConversationTarget },
    Unsubscribed { target: ConversationTarget },
    Error { code: String, message: String },
    Event { topic: Topic, event: ChatEvent },
    Presence { presence: PresencePayload },
}

impl ServerFrame {
    fn error(err: ApiError) -> Self {
        ServerFrame::Error {
            code: err.code().to_owned(),
            message: err.message().to_owned(),
        }
    }
}

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WebSocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let actor = state.jwt_service.actor_from_token(&query.token)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, actor)))
}

type WsSender = SplitSink<WebSocket, WsMessage>;

async fn handle_socket(socket: WebSocket, state: AppState, actor: Actor) {
    info!(tenant_id = %actor.tenant_id, user_id = %actor.user_id, "WebSocket 连接已建立");

    // 先订阅再上线，自己的上线事件也能收到
    let mut subscription = state.hub.subscribe();
    subscription.add_topic(Topic::tenant(actor.tenant_id));
    subscription.add_topic(Topic::user(actor.tenant_id, actor.user_id));

    match state.presence.connect(actor.tenant_id, actor.user_id).await {
        Ok(presence) => {
            state
                .broadcaster
                .emit_to_tenant(actor.tenant_id, ChatEvent::PresenceUpdated(presence))
                .await;
        }
        Err(err) => warn!(user_id = %actor.user_id, error = %err, "记录上线失败"),
    }

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let reply = handle_client_frame(&state, &actor, &mut subscription, text.as_str()).await;
                    if send_frame(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "WebSocket 读取失败");
                    break;
                }
            },
            envelope = subscription.recv() => match envelope {
                Some(envelope) => {
                    drop_revoked_topic(&actor, &mut subscription, &envelope);
                    let frame = ServerFrame::Event {
                        topic: envelope.topic.clone(),
                        event: envelope.event.clone(),
                    };
                    if send_frame(&mut sender, &frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    match state.presence.disconnect(actor.tenant_id, actor.user_id).await {
        Ok(presence) => {
            state
                .broadcaster
                .emit_to_tenant(actor.tenant_id, ChatEvent::PresenceUpdated(presence))
                .await;
        }
        Err(err) => warn!(user_id = %actor.user_id, error = %err, "记录下线失败"),
    }
    info!(tenant_id = %actor.tenant_id, user_id = %actor.user_id, "WebSocket 连接已关闭");
}

async fn handle_client_frame(
    state: &AppState,
    actor: &Actor,
    subscription: &mut TopicSubscription,
    text: &str,
) -> ServerFrame {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            return ServerFrame::Error {
                code: "INVALID_FRAME".to_owned(),
                message: err.to_string(),
            }
        }
    };

    match frame {
        ClientFrame::Subscribe { target } => {
            match state.chat_service.authorize_subscription(actor, target).await {
                Ok(topic) => {
                    subscription.add_topic(topic);
                    ServerFrame::Subscribed { target }
                }
                Err(err) => ServerFrame::error(err.into()),
            }
        }
        ClientFrame::Unsubscribe { target } => {
            subscription.remove_topic(&target.topic());
            ServerFrame::Unsubscribed { target }
        }
        ClientFrame::Heartbeat => {
            match state.presence.heartbeat(actor.tenant_id, actor.user_id).await {
                Ok(presence) => {
                    state
                        .broadcaster
                        .emit_to_tenant(actor.tenant_id, ChatEvent::PresenceUpdated(presence.clone()))
                        .await;
                    ServerFrame::Presence { presence }
                }
                Err(err) => ServerFrame::error(err.into()),
            }
        }
    }
}

/// 被移出频道后不再接收该频道的事件
fn drop_revoked_topic(actor: &Actor, subscription: &mut TopicSubscription, envelope: &EventEnvelope) {
    if let ChatEvent::ChannelMemberRemoved(payload) = &envelope.event {
        if payload.user_id == actor.user_id {
            let topic = Topic::channel(payload.channel_id);
            if subscription.remove_topic(&topic) {
                debug!(user_id = %actor.user_id, topic = %topic, "成员已移除，取消频道订阅");
            }
        }
    }
}

async fn send_frame(sender: &mut WsSender, frame: &ServerFrame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            warn!(error = %err, "序列化 WebSocket 帧失败");
            return Ok(());
        }
    };
    sender
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|err| debug!(error = %err, "WebSocket 发送失败"))
}
