use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use application::{ChatEvent, PresencePayload};
use domain::UserId;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
struct PresenceQuery {
    /// 逗号分隔的用户 id；省略时返回整个租户
    user_ids: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/presence", get(get_presence))
        .route("/presence/heartbeat", post(heartbeat))
}

fn parse_user_ids(raw: &str) -> Result<Vec<UserId>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            Uuid::parse_str(id)
                .map(UserId::from)
                .map_err(|_| ApiError::bad_request(format!("invalid user id `{id}`")))
        })
        .collect()
}

async fn get_presence(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PresenceQuery>,
) -> Result<Json<Vec<PresencePayload>>, ApiError> {
    let payloads = match query.user_ids.as_deref() {
        Some(raw) => {
            let user_ids = parse_user_ids(raw)?;
            state
                .presence
                .get_presence_for_users(actor.tenant_id, &user_ids)
                .await?
        }
        None => state.presence.get_all_presence_for_tenant(actor.tenant_id).await?,
    };
    Ok(Json(payloads))
}

/// 没有 WebSocket 连接的客户端用它保持在线
async fn heartbeat(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<PresencePayload>, ApiError> {
    let payload = state.presence.heartbeat(actor.tenant_id, actor.user_id).await?;
    state
        .broadcaster
        .emit_to_tenant(actor.tenant_id, ChatEvent::PresenceUpdated(payload.clone()))
        .await;
    Ok(Json(payload))
}
