use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Deserialize;
use serde_json::json;

use tribuna_core::polls::StoredPollResults;
use tribuna_model::{EventId, PollId, PollRecord, PollStatus, StaffRole};

use crate::api::{require_event_authority, require_session};
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

pub async fn list_polls(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<PollRecord>>> {
    let session = require_session(&state, &headers).await?;
    let event_id = EventId::new(event_id);
    require_event_authority(
        &state,
        &session,
        event_id,
        &[StaffRole::Admin, StaffRole::Moderator, StaffRole::Speaker],
    )
    .await?;

    Ok(Json(state.polls.list(event_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreatePollBody {
    pub question: String,
    pub options: Vec<String>,
}

pub async fn create_poll(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<CreatePollBody>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&state, &headers).await?;
    let event_id = EventId::new(event_id);
    require_event_authority(
        &state,
        &session,
        event_id,
        &[StaffRole::Admin, StaffRole::Moderator],
    )
    .await?;

    let poll_id = state
        .polls
        .create(event_id, body.question.trim(), &body.options)
        .await?;
    Ok(Json(json!({"id": poll_id})))
}

/// Edit a draft or published poll's question and options.
pub async fn update_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<CreatePollBody>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&state, &headers).await?;
    let poll_id = PollId::new(poll_id);

    let record = state
        .polls
        .get(poll_id)
        .await?
        .ok_or_else(|| AppError::not_found("Encuesta no encontrada"))?;
    require_event_authority(
        &state,
        &session,
        record.event_id,
        &[StaffRole::Admin, StaffRole::Moderator],
    )
    .await?;

    state
        .polls
        .update_content(poll_id, body.question.trim(), &body.options)
        .await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct PollStatusBody {
    pub status: String,
}

/// Toggle draft/published. Live closing happens on the socket path.
pub async fn update_poll_status(
    State(state): State<AppState>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<PollStatusBody>,
) -> AppResult<Json<serde_json::Value>> {
    let session = require_session(&state, &headers).await?;
    let poll_id = PollId::new(poll_id);

    let record = state
        .polls
        .get(poll_id)
        .await?
        .ok_or_else(|| AppError::not_found("Encuesta no encontrada"))?;
    require_event_authority(
        &state,
        &session,
        record.event_id,
        &[StaffRole::Admin, StaffRole::Moderator],
    )
    .await?;

    let status = match body.status.as_str() {
        "draft" => PollStatus::Draft,
        "published" => PollStatus::Published,
        other => return Err(AppError::bad_request(format!("invalid status: {other}"))),
    };

    state.polls.update_status(poll_id, status).await?;
    Ok(Json(json!({"ok": true})))
}

pub async fn poll_results(
    State(state): State<AppState>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<Json<StoredPollResults>> {
    let session = require_session(&state, &headers).await?;
    let poll_id = PollId::new(poll_id);

    let record = state
        .polls
        .get(poll_id)
        .await?
        .ok_or_else(|| AppError::not_found("Encuesta no encontrada"))?;
    require_event_authority(
        &state,
        &session,
        record.event_id,
        &[StaffRole::Admin, StaffRole::Moderator, StaffRole::Speaker],
    )
    .await?;

    let results = state
        .polls
        .stored_results(poll_id)
        .await?
        .ok_or_else(|| AppError::not_found("Encuesta no encontrada"))?;
    Ok(Json(results))
}
