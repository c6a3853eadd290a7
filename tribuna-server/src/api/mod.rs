//! HTTP side channel: the heartbeat fallback plus the staff JSON API. Every
//! handler resolves the caller's authority the same way the socket gateway
//! does: superadmin first, then the event staff assignment.

pub mod admin;
pub mod polls;
pub mod questions;
pub mod watch;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use tribuna_model::{EventId, GlobalRole, SessionRecord, StaffRole};

use crate::infra::app_state::AppState;
use crate::infra::cookies::{SESSION_COOKIE, cookie_value};
use crate::infra::errors::AppError;

pub async fn healthz() -> &'static str {
    "ok"
}

/// Session-authenticated heartbeat for clients whose socket is unavailable.
/// Returns 401 with a JSON error (not a redirect) so the frontend can
/// re-authenticate.
pub async fn ping(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match session_from_headers(&state, &headers).await {
        Some(session) => session,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "session_expired"})),
            )
                .into_response();
        }
    };

    if let Some(event_id) = session.current_event_id
        && let Err(err) = state.presence.record_ping(event_id, session.user_id).await
    {
        warn!(error = %err, "ping writeback failed");
    }

    Json(json!({"ok": true})).into_response()
}

/// Drop the caller's session; the token is invalid everywhere within one
/// round trip.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = cookie_value(&headers, SESSION_COOKIE)
        && let Err(err) = state.sessions.delete(&token).await
    {
        warn!(error = %err, "session delete failed");
    }
    Json(json!({"ok": true})).into_response()
}

pub(crate) async fn session_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Option<SessionRecord> {
    let token = cookie_value(headers, SESSION_COOKIE)?;
    state.sessions.get(&token).await
}

pub(crate) async fn require_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<SessionRecord, AppError> {
    session_from_headers(state, headers)
        .await
        .ok_or_else(|| AppError::unauthorized("session_expired"))
}

/// Superadmins pass outright; everyone else needs one of the listed staff
/// roles on this event.
pub(crate) async fn require_event_authority(
    state: &AppState,
    session: &SessionRecord,
    event_id: EventId,
    allowed: &[StaffRole],
) -> Result<(), AppError> {
    if session.global_role == GlobalRole::Superadmin {
        return Ok(());
    }

    let staff = state.users.event_role(session.user_id, event_id).await?;
    match staff {
        Some(role) if allowed.contains(&role) => Ok(()),
        _ => Err(AppError::forbidden("role_forbidden")),
    }
}
