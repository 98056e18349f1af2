use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use application::dto::{ChannelDto, ChannelMemberDto, DmThreadDto, OpenDmDto};
use application::CreateChannelRequest;
use domain::{ChannelId, UserId};

use crate::{
    auth::AuthUser,
    error::{validate, ApiError},
    message_routes, presence_routes,
    state::AppState,
    upload_routes, websocket,
};

// multipart 的边界和头部开销
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize, Validate)]
struct CreateChannelPayload {
    #[validate(length(min = 1, max = 80))]
    name: String,
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Deserialize)]
struct AddMemberPayload {
    user_id: Uuid,
}

/// 成员列表可以包含调用者自己，去重后由领域层校验人数
#[derive(Debug, Deserialize, Validate)]
struct OpenDmPayload {
    #[validate(length(min = 1, max = 11))]
    member_ids: Vec<Uuid>,
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state.upload_service.max_bytes() + MULTIPART_OVERHEAD_BYTES;
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes(upload_limit))
        .with_state(state)
}

fn api_routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/channels", get(list_channels).post(create_channel))
        .route("/channels/my", get(list_my_channels))
        .route("/channels/{channel_id}/join", post(join_channel))
        .route("/channels/{channel_id}/leave", delete(leave_channel))
        .route(
            "/channels/{channel_id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/channels/{channel_id}/members/{user_id}",
            delete(remove_member),
        )
        .route("/dm", get(list_dms).post(open_dm))
        .merge(message_routes::routes())
        .merge(presence_routes::routes())
        .merge(upload_routes::routes().layer(DefaultBodyLimit::max(upload_limit)))
        .route("/ws", get(websocket::websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_channels(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ChannelDto>>, ApiError> {
    Ok(Json(state.channel_service.list_visible_channels(&actor).await?))
}

async fn list_my_channels(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ChannelDto>>, ApiError> {
    Ok(Json(state.channel_service.list_joined_channels(&actor).await?))
}

async fn create_channel(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateChannelPayload>,
) -> Result<(StatusCode, Json<ChannelDto>), ApiError> {
    validate(&payload)?;
    let dto = state
        .channel_service
        .create_channel(
            &actor,
            CreateChannelRequest {
                name: payload.name,
                is_private: payload.is_private,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(dto)))
}

async fn join_channel(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ChannelMemberDto>), ApiError> {
    let dto = state
        .channel_service
        .join_channel(&actor, ChannelId::from(channel_id))
        .await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

async fn leave_channel(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .channel_service
        .leave_channel(&actor, ChannelId::from(channel_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_members(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
) -> Result<Json<Vec<ChannelMemberDto>>, ApiError> {
    Ok(Json(
        state
            .channel_service
            .list_members(&actor, ChannelId::from(channel_id))
            .await?,
    ))
}

async fn add_member(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Json(payload): Json<AddMemberPayload>,
) -> Result<(StatusCode, Json<ChannelMemberDto>), ApiError> {
    let dto = state
        .channel_service
        .add_member(&actor, ChannelId::from(channel_id), UserId::from(payload.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

async fn remove_member(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path((channel_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .channel_service
        .remove_member(&actor, ChannelId::from(channel_id), UserId::from(user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn open_dm(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<OpenDmPayload>,
) -> Result<(StatusCode, Json<OpenDmDto>), ApiError> {
    validate(&payload)?;
    let member_ids = payload.member_ids.into_iter().map(UserId::from).collect();
    let dto = state.channel_service.open_dm(&actor, member_ids).await?;
    let status = if dto.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(dto)))
}

async fn list_dms(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<DmThreadDto>>, ApiError> {
    Ok(Json(state.channel_service.list_dms(&actor).await?))
}
