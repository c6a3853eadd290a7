use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Deserialize;
use serde_json::json;

use tribuna_core::users::{StaffMember, UserFlag};
use tribuna_model::{Event, EventId, OutboundFrame, StaffRole, UserId};

use crate::api::{require_event_authority, require_session};
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

/// Transition the event to closed; every socket bound to it — on any
/// instance — is terminated.
pub async fn close_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<Json<Event>> {
    let session = require_session(&state, &headers).await?;
    let event_id = EventId::new(event_id);
    require_event_authority(&state, &session, event_id, &[StaffRole::Admin]).await?;

    let event = state.close_event(event_id).await?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
pub struct UserFlagBody {
    pub event_id: i64,
    pub field: String,
    pub value: bool,
}

/// Flip a moderation flag on a user. Banning also tells the event's clients
/// to drop that user's session.
pub async fn set_user_flags(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<UserFlagBody>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&state, &headers).await?;
    let event_id = EventId::new(body.event_id);
    let user_id = UserId::new(user_id);
    require_event_authority(
        &state,
        &session,
        event_id,
        &[StaffRole::Admin, StaffRole::Moderator],
    )
    .await?;

    let flag = UserFlag::parse(&body.field)
        .ok_or_else(|| AppError::bad_request(format!("invalid field: {}", body.field)))?;

    state.users.set_flag(user_id, flag, body.value).await?;

    if flag == UserFlag::Banned && body.value {
        state
            .broadcast(&OutboundFrame::ForceLogout { user_id }, None, Some(event_id))
            .await;
    }

    Ok(Json(json!({"ok": true})))
}

pub async fn list_staff(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<StaffMember>>> {
    let session = require_session(&state, &headers).await?;
    let event_id = EventId::new(event_id);
    require_event_authority(&state, &session, event_id, &[StaffRole::Admin]).await?;

    Ok(Json(state.users.list_staff(event_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StaffBody {
    pub email: String,
    pub role: String,
}

pub async fn upsert_staff(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<StaffBody>,
) -> AppResult<Json<StaffMember>> {
    let session = require_session(&state, &headers).await?;
    let event_id = EventId::new(event_id);
    require_event_authority(&state, &session, event_id, &[StaffRole::Admin]).await?;

    let role: StaffRole = body
        .role
        .parse()
        .map_err(|()| AppError::bad_request(format!("invalid role: {}", body.role)))?;

    let member = state.users.upsert_staff(event_id, &body.email, role).await?;
    Ok(Json(member))
}

pub async fn remove_staff(
    State(state): State<AppState>,
    Path((event_id, user_id)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&state, &headers).await?;
    let event_id = EventId::new(event_id);
    require_event_authority(&state, &session, event_id, &[StaffRole::Admin]).await?;

    let removed = state
        .users
        .remove_staff(UserId::new(user_id), event_id)
        .await?;
    Ok(Json(json!({"removed": removed})))
}
