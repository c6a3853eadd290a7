use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};

use tribuna_model::{EventId, QuestionBoards, StaffRole};

use crate::api::{require_event_authority, require_session};
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;

const BOARD_LIMIT: i64 = 50;

/// The staff board: recent questions grouped by state.
pub async fn question_boards(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<Json<QuestionBoards>> {
    let session = require_session(&state, &headers).await?;
    let event_id = EventId::new(event_id);
    require_event_authority(
        &state,
        &session,
        event_id,
        &[StaffRole::Admin, StaffRole::Moderator, StaffRole::Speaker],
    )
    .await?;

    let tz = state.event_timezone(Some(event_id)).await;
    let boards = state
        .questions
        .boards(event_id, BOARD_LIMIT, tz.as_deref())
        .await?;
    Ok(Json(boards))
}
