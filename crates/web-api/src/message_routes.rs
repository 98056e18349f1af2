//! 消息、线程、表情反应与已读状态

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use application::dto::{
    MessageDto, MessagePageDto, ReactionResultDto, ReadReceiptDto, ReadStateDto, ThreadSummaryDto,
    UnreadCountDto,
};
use application::events::MessageDeletedPayload;
use application::{HistoryRequest, SendMessageRequest};
use domain::{AttachmentId, ChannelId, ConversationTarget, DmThreadId, MessageId, TargetType};

use crate::{
    auth::AuthUser,
    error::{validate, ApiError},
    state::AppState,
};

#[derive(Debug, Deserialize, Validate)]
struct SendMessagePayload {
    #[validate(length(min = 1, max = 10000))]
    body: String,
    #[serde(default)]
    attachment_ids: Vec<Uuid>,
    parent_message_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
struct EditMessagePayload {
    #[validate(length(min = 1, max = 10000))]
    body: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    before: Option<Uuid>,
    after: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct ThreadQuery {
    limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
struct ReactionPayload {
    #[validate(length(min = 1, max = 64))]
    emoji: String,
}

#[derive(Debug, Deserialize)]
struct MarkReadPayload {
    target_type: String,
    target_id: Uuid,
    last_read_message_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
struct ThreadSummariesPayload {
    target_type: String,
    target_id: Uuid,
    #[validate(length(max = 200))]
    message_ids: Vec<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/channels/{channel_id}/messages",
            get(channel_history).post(send_channel_message),
        )
        .route(
            "/dm/{dm_thread_id}/messages",
            get(dm_history).post(send_dm_message),
        )
        .route(
            "/messages/{message_id}",
            patch(edit_message).delete(delete_message),
        )
        .route("/messages/{message_id}/thread", get(thread_replies))
        .route("/messages/{message_id}/reactions", post(add_reaction))
        .route(
            "/messages/{message_id}/reactions/{emoji}",
            delete(remove_reaction),
        )
        .route("/reads", post(mark_read))
        .route("/reads/{target_type}/{target_id}", get(read_state))
        .route("/unread", get(unread_counts))
        .route("/thread-summaries", post(thread_summaries))
}

fn parse_target(target_type: &str, id: Uuid) -> Result<ConversationTarget, ApiError> {
    let target_type = TargetType::parse(target_type).map_err(application::ApplicationError::from)?;
    Ok(ConversationTarget::from_parts(target_type, id))
}

async fn channel_history(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePageDto>, ApiError> {
    history(state, actor, ConversationTarget::Channel(ChannelId::from(channel_id)), query).await
}

async fn dm_history(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(dm_thread_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePageDto>, ApiError> {
    history(state, actor, ConversationTarget::Dm(DmThreadId::from(dm_thread_id)), query).await
}

async fn history(
    state: AppState,
    actor: domain::Actor,
    target: ConversationTarget,
    query: HistoryQuery,
) -> Result<Json<MessagePageDto>, ApiError> {
    let page = state
        .chat_service
        .list_messages(
            &actor,
            target,
            HistoryRequest {
                limit: query.limit,
                before: query.before.map(MessageId::from),
                after: query.after.map(MessageId::from),
            },
        )
        .await?;
    Ok(Json(page))
}

async fn send_channel_message(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageDto>), ApiError> {
    send(state, actor, ConversationTarget::Channel(ChannelId::from(channel_id)), payload).await
}

async fn send_dm_message(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(dm_thread_id): Path<Uuid>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageDto>), ApiError> {
    send(state, actor, ConversationTarget::Dm(DmThreadId::from(dm_thread_id)), payload).await
}

async fn send(
    state: AppState,
    actor: domain::Actor,
    target: ConversationTarget,
    payload: SendMessagePayload,
) -> Result<(StatusCode, Json<MessageDto>), ApiError> {
    validate(&payload)?;
    let request = SendMessageRequest {
        target,
        body: payload.body,
        attachment_ids: payload.attachment_ids.into_iter().map(AttachmentId::from).collect(),
        parent_message_id: payload.parent_message_id.map(MessageId::from),
    };
    let dto = state.chat_service.send_message(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

async fn edit_message(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<EditMessagePayload>,
) -> Result<Json<MessageDto>, ApiError> {
    validate(&payload)?;
    let dto = state
        .chat_service
        .edit_message(&actor, MessageId::from(message_id), payload.body)
        .await?;
    Ok(Json(dto))
}

async fn delete_message(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<MessageDeletedPayload>, ApiError> {
    let payload = state
        .chat_service
        .delete_message(&actor, MessageId::from(message_id))
        .await?;
    Ok(Json(payload))
}

async fn thread_replies(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Query(query): Query<ThreadQuery>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let replies = state
        .chat_service
        .get_thread_replies(&actor, MessageId::from(message_id), query.limit)
        .await?;
    Ok(Json(replies))
}

async fn add_reaction(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<ReactionPayload>,
) -> Result<(StatusCode, Json<ReactionResultDto>), ApiError> {
    validate(&payload)?;
    let dto = state
        .chat_service
        .add_reaction(&actor, MessageId::from(message_id), &payload.emoji)
        .await?;
    let status = if dto.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(dto)))
}

async fn remove_reaction(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path((message_id, emoji)): Path<(Uuid, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .chat_service
        .remove_reaction(&actor, MessageId::from(message_id), &emoji)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_read(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<MarkReadPayload>,
) -> Result<Json<ReadReceiptDto>, ApiError> {
    let target = parse_target(&payload.target_type, payload.target_id)?;
    let dto = state
        .chat_service
        .mark_read(&actor, target, MessageId::from(payload.last_read_message_id))
        .await?;
    Ok(Json(dto))
}

async fn read_state(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path((target_type, target_id)): Path<(String, Uuid)>,
) -> Result<Json<ReadStateDto>, ApiError> {
    let target = parse_target(&target_type, target_id)?;
    Ok(Json(state.chat_service.get_read_state(&actor, target).await?))
}

async fn unread_counts(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<UnreadCountDto>>, ApiError> {
    Ok(Json(state.chat_service.unread_counts(&actor).await?))
}

async fn thread_summaries(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ThreadSummariesPayload>,
) -> Result<Json<Vec<ThreadSummaryDto>>, ApiError> {
    validate(&payload)?;
    let target = parse_target(&payload.target_type, payload.target_id)?;
    let ids: Vec<MessageId> = payload.message_ids.into_iter().map(MessageId::from).collect();
    Ok(Json(
        state
            .chat_service
            .compute_thread_summaries(&actor, target, &ids)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::MAX_MESSAGE_BODY_CHARS;

    #[test]
    fn body_length_matches_domain_limit() {
        let payload = EditMessagePayload {
            body: "x".repeat(MAX_MESSAGE_BODY_CHARS + 1),
        };
        assert!(payload.validate().is_err());
        let payload = EditMessagePayload {
            body: "x".repeat(MAX_MESSAGE_BODY_CHARS),
        };
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn unknown_target_types_are_bad_requests() {
        let err = parse_target("room", Uuid::new_v4()).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(matches!(
            parse_target("dm", Uuid::nil()).unwrap(),
            ConversationTarget::Dm(_)
        ));
    }
}
