use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use tribuna_core::clock::format_local;
use tribuna_core::hot::keys;
use tribuna_model::{ChatMessageView, Event, EventId, QuestionStatus, QuestionView};

use crate::api::require_session;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

/// Everything the watch page needs for its initial render: the event
/// descriptor, recent chat, and the approved-question board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchBundle {
    pub event: Event,
    pub chats: Vec<ChatMessageView>,
    pub approved_questions: Vec<QuestionView>,
}

const RECENT_CHAT_LIMIT: usize = 25;
const APPROVED_LIMIT: i64 = 30;

/// Viewer-page bootstrap: look the event up by its public slug.
pub async fn event_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Event>> {
    require_session(&state, &headers).await?;
    let event = state
        .events
        .get_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::not_found("Evento no encontrado"))?;
    Ok(Json(event))
}

pub async fn watch_bundle(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<Json<WatchBundle>> {
    require_session(&state, &headers).await?;
    let event_id = EventId::new(event_id);

    let ttl = state.config.realtime.watch_cache_ttl_secs;
    let cache_key = keys::watch_bundle(event_id);
    if ttl > 0
        && let Ok(Some(bundle)) = state.cache.get_json::<WatchBundle>(&cache_key).await
    {
        return Ok(Json(bundle));
    }

    let event = state
        .events
        .get(event_id)
        .await?
        .ok_or_else(|| AppError::not_found("Evento no encontrado"))?;
    let tz = event.timezone.clone();

    let chats = state
        .chat
        .recent(event_id, RECENT_CHAT_LIMIT, tz.as_deref())
        .await?;
    let approved_questions = state
        .questions
        .list(event_id, Some(QuestionStatus::Approved), APPROVED_LIMIT)
        .await?
        .into_iter()
        .map(|record| QuestionView {
            id: record.id,
            user: record.user_name,
            question: record.question_text,
            timestamp: format_local(record.created_at, tz.as_deref()),
        })
        .collect();

    let bundle = WatchBundle {
        event,
        chats,
        approved_questions,
    };

    if ttl > 0 {
        let _ = state.cache.set_json_ex(&cache_key, &bundle, ttl).await;
    }

    Ok(Json(bundle))
}
