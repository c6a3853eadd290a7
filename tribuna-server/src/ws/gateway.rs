//! Socket gateway: authenticates the upgrade, computes the socket's
//! effective role once, then owns the per-socket read/write loop and
//! dispatches inbound frames into the services.
//!
//! Close codes: 4001 session_missing/session_expired/session_invalid,
//! 4002 event_missing, 4003 role_forbidden.

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use tribuna_core::error::CoreError;
use tribuna_core::validate::MessageKind;
use tribuna_model::{
    EventId, GlobalRole, InboundFrame, OutboundFrame, PollId, SessionRecord, SocketRole, StaffRole,
};

use crate::infra::app_state::AppState;
use crate::infra::cookies::{EVENT_COOKIE, SESSION_COOKIE, cookie_value};
use crate::ws::hub::{SocketCommand, SocketHandle};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub role: Option<String>,
    pub event_id: Option<String>,
}

/// Why an upgrade was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: &'static str,
}

pub const SESSION_MISSING: CloseReason = CloseReason {
    code: 4001,
    reason: "session_missing",
};
pub const SESSION_EXPIRED: CloseReason = CloseReason {
    code: 4001,
    reason: "session_expired",
};
pub const SESSION_INVALID: CloseReason = CloseReason {
    code: 4001,
    reason: "session_invalid",
};
pub const EVENT_MISSING: CloseReason = CloseReason {
    code: 4002,
    reason: "event_missing",
};
pub const ROLE_FORBIDDEN: CloseReason = CloseReason {
    code: 4003,
    reason: "role_forbidden",
};

/// Effective-role resolution. Precedence: superadmin, then the event staff
/// assignment, then per-event account promotion bound to the session's
/// event, then plain viewer. Non-viewer roles need a resolved event so the
/// assignment can be checked at all.
pub fn resolve_role(
    requested: SocketRole,
    global_role: GlobalRole,
    staff_role: Option<StaffRole>,
    event_id: Option<EventId>,
    session_event_id: Option<EventId>,
) -> Result<SocketRole, CloseReason> {
    if requested == SocketRole::Viewer {
        return Ok(SocketRole::Viewer);
    }

    let Some(event_id) = event_id else {
        return Err(EVENT_MISSING);
    };

    let is_superadmin = global_role == GlobalRole::Superadmin;
    let session_event_matches = session_event_id == Some(event_id);

    let allowed = match requested {
        SocketRole::Viewer => true,
        SocketRole::Moderator => {
            is_superadmin
                || matches!(staff_role, Some(StaffRole::Admin | StaffRole::Moderator))
                || (global_role == GlobalRole::Moderator && session_event_matches)
        }
        SocketRole::Speaker => {
            is_superadmin
                || matches!(staff_role, Some(StaffRole::Admin | StaffRole::Speaker))
                || (global_role == GlobalRole::Speaker && session_event_matches)
        }
        SocketRole::Reports => is_superadmin || staff_role == Some(StaffRole::Admin),
    };

    if allowed {
        Ok(requested)
    } else {
        Err(ROLE_FORBIDDEN)
    }
}

/// Handle the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query, headers))
}

async fn close_with(mut socket: WebSocket, close: CloseReason) {
    debug!(code = close.code, reason = close.reason, "refusing socket");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close.code,
            reason: Utf8Bytes::from_static(close.reason),
        })))
        .await;
}

fn resolve_event_id(
    query: &WsQuery,
    session: &SessionRecord,
    headers: &HeaderMap,
) -> Option<EventId> {
    // Query param first, then the session's bound event, then the cookie set
    // by the page handlers. A malformed value falls through.
    query
        .event_id
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .map(EventId::new)
        .or(session.current_event_id)
        .or_else(|| {
            cookie_value(headers, EVENT_COOKIE)
                .and_then(|raw| raw.parse::<i64>().ok())
                .map(EventId::new)
        })
}

async fn handle_socket(socket: WebSocket, state: AppState, query: WsQuery, headers: HeaderMap) {
    let Some(token) = cookie_value(&headers, SESSION_COOKIE) else {
        return close_with(socket, SESSION_MISSING).await;
    };

    let Some(session) = state.sessions.get(&token).await else {
        return close_with(socket, SESSION_EXPIRED).await;
    };
    if session.user_id.as_i64() <= 0 {
        return close_with(socket, SESSION_INVALID).await;
    }
    if state.users.is_banned(session.user_id).await.unwrap_or(false) {
        return close_with(socket, ROLE_FORBIDDEN).await;
    }

    let event_id = resolve_event_id(&query, &session, &headers);

    let requested = match query.role.as_deref().unwrap_or("viewer").parse::<SocketRole>() {
        Ok(role) => role,
        Err(()) => return close_with(socket, ROLE_FORBIDDEN).await,
    };

    let staff_role = match event_id {
        Some(event_id) => match state.users.event_role(session.user_id, event_id).await {
            Ok(role) => role,
            Err(err) => {
                warn!(error = %err, "staff role lookup failed");
                None
            }
        },
        None => None,
    };

    let role = match resolve_role(
        requested,
        session.global_role,
        staff_role,
        event_id,
        session.current_event_id,
    ) {
        Ok(role) => role,
        Err(close) => return close_with(socket, close).await,
    };

    let event_timezone = state.event_timezone(event_id).await;

    let (handle, mut commands) = SocketHandle::channel(
        session.user_id,
        session.user_name.clone(),
        role,
        event_id,
    );
    state.hub.register(handle.clone());

    if let Some(event_id) = event_id {
        state.relay.subscribe(event_id);
    }

    if role == SocketRole::Viewer
        && let Some(event_id) = event_id
        && let Err(err) = state.presence.ensure_session(event_id, session.user_id).await
    {
        warn!(error = %err, "presence ensure failed on open");
    }

    state.snapshots.trigger(event_id);

    info!(
        role = %role,
        user = %session.user_id,
        event = ?event_id.map(|id| id.as_i64()),
        "socket connected"
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                SocketCommand::Frame(text) => {
                    if ws_sender
                        .send(Message::Text(Utf8Bytes::from(text.as_ref())))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                SocketCommand::Close(frame) => {
                    let close = frame.map(|(code, reason)| CloseFrame {
                        code,
                        reason: Utf8Bytes::from_static(reason),
                    });
                    let _ = ws_sender.send(Message::Close(close)).await;
                    break;
                }
            }
        }
    });

    // Resynchronize a live poll to the fresh socket so a reload never misses
    // it; there is no replay.
    if let Some(event_id) = event_id {
        match state.polls.live(event_id).await {
            Ok(Some(poll)) => {
                handle.send_frame(&OutboundFrame::PollStart { poll });
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "live poll sync failed"),
        }
    }

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                // Sessions have a 5-minute sliding TTL; a purged session
                // drops the socket so the client re-authenticates.
                if state.sessions.get(&token).await.is_none() {
                    handle.send(SocketCommand::Close(Some((
                        SESSION_EXPIRED.code,
                        SESSION_EXPIRED.reason,
                    ))));
                    break;
                }

                let frame = match serde_json::from_str::<InboundFrame>(text.as_str()) {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(error = %err, "unparseable inbound frame");
                        handle.send_frame(&OutboundFrame::Error {
                            message: "Formato de mensaje inválido.".to_string(),
                        });
                        continue;
                    }
                };

                if let Err(err) = dispatch(
                    &state,
                    &handle,
                    event_id,
                    event_timezone.as_deref(),
                    frame,
                )
                .await
                {
                    match err {
                        CoreError::Validation(message) | CoreError::State(message) => {
                            handle.send_frame(&OutboundFrame::Error { message });
                        }
                        other => {
                            // The reactor never dies on a single-socket error.
                            error!(error = %other, "message handler error");
                        }
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "socket read error");
                break;
            }
        }
    }

    state.hub.unregister(role, handle.id);

    if role == SocketRole::Viewer
        && let Some(event_id) = event_id
        && let Err(err) = state.presence.mark_inactive(event_id, session.user_id).await
    {
        warn!(error = %err, "presence mark_inactive failed on close");
    }

    state.snapshots.trigger(event_id);

    if let Some(event_id) = event_id
        && !state.hub.has_event_sockets(event_id)
    {
        state.relay.unsubscribe(event_id);
    }

    info!(role = %role, user = %session.user_id, "socket disconnected");

    // Dropping the handle closes the writer channel; the task drains what is
    // queued (including a pending close frame) and exits.
    drop(handle);
    let _ = writer.await;
}

async fn dispatch(
    state: &AppState,
    handle: &SocketHandle,
    event_id: Option<EventId>,
    tz: Option<&str>,
    frame: InboundFrame,
) -> Result<(), CoreError> {
    let user_id = handle.user_id;
    let role = handle.role;

    match frame {
        InboundFrame::Chat { message } => {
            let text = message.trim();
            if text.is_empty() {
                return Ok(());
            }
            if state.users.is_chat_blocked(user_id).await? {
                return Err(CoreError::Validation(
                    "Tu acceso al chat ha sido restringido.".to_string(),
                ));
            }
            let Some(event_id) = event_id else {
                return Err(CoreError::Validation(
                    "Faltan datos de evento o usuario para validar el mensaje.".to_string(),
                ));
            };

            state
                .validator
                .validate(event_id, user_id, text, MessageKind::Chat)
                .await?;

            let view = state
                .chat
                .append(user_id, &handle.user_name, text, event_id, tz)
                .await;
            state
                .broadcast(
                    &OutboundFrame::Chat {
                        user: view.user,
                        user_id: view.user_id,
                        message: view.message,
                        timestamp: view.timestamp,
                    },
                    None,
                    Some(event_id),
                )
                .await;

            // History is write-behind; viewers already saw the message.
            let chat = state.chat.clone();
            let text = text.to_string();
            tokio::spawn(async move {
                if let Err(err) = chat.persist(user_id, &text, event_id).await {
                    error!(error = %err, "chat persist failed");
                }
            });

            state.snapshots.trigger(Some(event_id));
        }

        InboundFrame::Ask {
            question,
            manual_user,
        } => {
            let text = question.trim();
            if text.is_empty() {
                return Ok(());
            }
            if state.users.is_qa_blocked(user_id).await? {
                return Err(CoreError::Validation(
                    "Tu acceso a preguntas ha sido restringido.".to_string(),
                ));
            }
            let Some(event_id) = event_id else {
                return Err(CoreError::Validation(
                    "Faltan datos de evento o usuario para validar el mensaje.".to_string(),
                ));
            };

            state
                .validator
                .validate(event_id, user_id, text, MessageKind::Qa)
                .await?;

            let view = state
                .questions
                .add(
                    user_id,
                    &handle.user_name,
                    text,
                    Some(event_id),
                    manual_user.as_deref(),
                    tz,
                )
                .await?;
            state
                .broadcast(
                    &OutboundFrame::PendingQuestion(view),
                    Some(&[SocketRole::Moderator]),
                    Some(event_id),
                )
                .await;
            state.snapshots.trigger(Some(event_id));
        }

        InboundFrame::Approve { id } if role == SocketRole::Moderator => {
            let view = state.questions.approve(id, tz).await?;
            state
                .broadcast(
                    &OutboundFrame::ApprovedQuestion(view),
                    Some(&[SocketRole::Viewer, SocketRole::Speaker, SocketRole::Moderator]),
                    event_id,
                )
                .await;
            state.snapshots.trigger(event_id);
        }

        InboundFrame::Reject { id } if role == SocketRole::Moderator => {
            state.questions.reject(id).await?;
            state
                .broadcast(
                    &OutboundFrame::RejectedQuestion { id },
                    Some(&[SocketRole::Moderator]),
                    event_id,
                )
                .await;
            state.snapshots.trigger(event_id);
        }

        InboundFrame::Read { id } if role == SocketRole::Speaker => {
            let view = state.questions.mark_read(id, tz).await?;
            state
                .broadcast(
                    &OutboundFrame::QuestionRead(view),
                    Some(&[SocketRole::Viewer, SocketRole::Speaker, SocketRole::Moderator]),
                    event_id,
                )
                .await;
            state.snapshots.trigger(event_id);
        }

        InboundFrame::ReturnToModerator { id } if role == SocketRole::Speaker => {
            let view = state.questions.return_to_pending(id, tz).await?;
            // Drop it from the approved/speaker views, then requeue it for
            // the moderator.
            state
                .broadcast(
                    &OutboundFrame::QuestionRemoved { id },
                    Some(&[SocketRole::Viewer, SocketRole::Speaker, SocketRole::Moderator]),
                    event_id,
                )
                .await;
            state
                .broadcast(
                    &OutboundFrame::PendingQuestion(view),
                    Some(&[SocketRole::Moderator]),
                    event_id,
                )
                .await;
            state.snapshots.trigger(event_id);
        }

        InboundFrame::Ping if role == SocketRole::Viewer => {
            if let Some(event_id) = event_id {
                // No snapshot trigger here: at scale that would be thousands
                // of recomputations per second. The periodic tick covers it.
                state.presence.record_ping(event_id, user_id).await?;
            }
        }

        InboundFrame::PollStart {
            poll_id,
            question,
            options,
            duration_minutes,
        } if matches!(role, SocketRole::Moderator | SocketRole::Speaker) => {
            let Some(event_id) = event_id else {
                return Err(CoreError::State("Evento no disponible.".to_string()));
            };

            let live = match poll_id {
                Some(poll_id) => state.polls.launch(event_id, poll_id, duration_minutes).await?,
                None => {
                    let question = question
                        .as_deref()
                        .map(str::trim)
                        .filter(|q| !q.is_empty())
                        .ok_or_else(|| CoreError::Validation("Invalid poll data".to_string()))?;
                    let options = options
                        .ok_or_else(|| CoreError::Validation("Invalid poll data".to_string()))?;
                    state
                        .polls
                        .start(event_id, question, &options, duration_minutes)
                        .await?
                }
            };

            if let Some(close_at) = live.close_at {
                schedule_auto_close(state, event_id, live.poll_id, close_at);
            }
            state
                .broadcast(&OutboundFrame::PollStart { poll: live }, None, Some(event_id))
                .await;
            state.snapshots.trigger(Some(event_id));
        }

        InboundFrame::PollVote { option_index } => {
            let Some(event_id) = event_id else {
                return Err(CoreError::State("No hay una encuesta activa.".to_string()));
            };

            match state.polls.vote(event_id, user_id, option_index).await? {
                Some(tally) => {
                    let polls = state.polls.clone();
                    let poll_id = tally.poll_id;
                    tokio::spawn(async move {
                        if let Err(err) = polls
                            .record_vote_audit(poll_id, event_id, user_id, option_index)
                            .await
                        {
                            error!(error = %err, "vote audit failed");
                        }
                    });

                    state
                        .broadcast(
                            &OutboundFrame::PollUpdateResults {
                                poll_id: tally.poll_id,
                                results: tally.results,
                                total_votes: tally.total_votes,
                            },
                            None,
                            Some(event_id),
                        )
                        .await;
                }
                // A duplicate vote is dropped without a broadcast.
                None => {}
            }
        }

        InboundFrame::PollClose if matches!(role, SocketRole::Moderator | SocketRole::Speaker) => {
            let Some(event_id) = event_id else {
                return Err(CoreError::State("No hay una encuesta activa.".to_string()));
            };

            match state.polls.close(event_id).await? {
                Some(final_results) => {
                    state.poll_timers.cancel(event_id, final_results.poll_id);
                    state
                        .broadcast(
                            &OutboundFrame::PollEnd { final_results },
                            None,
                            Some(event_id),
                        )
                        .await;
                    state.snapshots.trigger(Some(event_id));
                }
                None => {
                    return Err(CoreError::State("No hay una encuesta activa.".to_string()));
                }
            }
        }

        other => {
            debug!(role = %role, frame = ?other, "frame not permitted for role");
        }
    }

    Ok(())
}

/// Schedule the timed close. When the timer fires it re-checks that the same
/// poll is still live; a manual close or replacement in the meantime makes
/// it a no-op.
pub fn schedule_auto_close(
    state: &AppState,
    event_id: EventId,
    poll_id: PollId,
    close_at: DateTime<Utc>,
) {
    let fire_state = state.clone();
    state
        .poll_timers
        .schedule(event_id, poll_id, close_at, async move {
            match fire_state.polls.live_raw(event_id).await {
                Ok(Some(live)) if live.poll_id == poll_id => {}
                Ok(_) => return,
                Err(err) => {
                    warn!(error = %err, "auto-close live check failed");
                    return;
                }
            }

            match fire_state.polls.close(event_id).await {
                Ok(Some(final_results)) => {
                    fire_state
                        .broadcast(
                            &OutboundFrame::PollEnd { final_results },
                            None,
                            Some(event_id),
                        )
                        .await;
                    fire_state.snapshots.trigger(Some(event_id));
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "poll auto-close failed"),
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: Option<EventId> = Some(EventId(4));

    #[test]
    fn viewer_is_always_permitted() {
        let role = resolve_role(SocketRole::Viewer, GlobalRole::Viewer, None, None, None);
        assert_eq!(role, Ok(SocketRole::Viewer));
    }

    #[test]
    fn non_viewer_roles_need_an_event() {
        for requested in [SocketRole::Moderator, SocketRole::Speaker, SocketRole::Reports] {
            let refused = resolve_role(requested, GlobalRole::Superadmin, None, None, None);
            assert_eq!(refused, Err(EVENT_MISSING));
        }
    }

    #[test]
    fn superadmin_gets_any_role() {
        for requested in [SocketRole::Moderator, SocketRole::Speaker, SocketRole::Reports] {
            let role = resolve_role(requested, GlobalRole::Superadmin, None, EVENT, None);
            assert_eq!(role, Ok(requested));
        }
    }

    #[test]
    fn staff_assignment_grants_matching_roles() {
        assert_eq!(
            resolve_role(
                SocketRole::Moderator,
                GlobalRole::Viewer,
                Some(StaffRole::Moderator),
                EVENT,
                None
            ),
            Ok(SocketRole::Moderator)
        );
        assert_eq!(
            resolve_role(
                SocketRole::Speaker,
                GlobalRole::Viewer,
                Some(StaffRole::Speaker),
                EVENT,
                None
            ),
            Ok(SocketRole::Speaker)
        );
        // Event admins hold every staff capability including reports.
        for requested in [SocketRole::Moderator, SocketRole::Speaker, SocketRole::Reports] {
            assert_eq!(
                resolve_role(
                    requested,
                    GlobalRole::Viewer,
                    Some(StaffRole::Admin),
                    EVENT,
                    None
                ),
                Ok(requested)
            );
        }
    }

    #[test]
    fn cross_capability_staff_is_refused() {
        assert_eq!(
            resolve_role(
                SocketRole::Speaker,
                GlobalRole::Viewer,
                Some(StaffRole::Moderator),
                EVENT,
                None
            ),
            Err(ROLE_FORBIDDEN)
        );
        assert_eq!(
            resolve_role(
                SocketRole::Reports,
                GlobalRole::Viewer,
                Some(StaffRole::Moderator),
                EVENT,
                None
            ),
            Err(ROLE_FORBIDDEN)
        );
    }

    #[test]
    fn per_event_promotion_is_bound_to_the_session_event() {
        // Promoted moderator account bound to the same event: allowed.
        assert_eq!(
            resolve_role(SocketRole::Moderator, GlobalRole::Moderator, None, EVENT, EVENT),
            Ok(SocketRole::Moderator)
        );
        // Same account pointed at a different event: refused.
        assert_eq!(
            resolve_role(
                SocketRole::Moderator,
                GlobalRole::Moderator,
                None,
                EVENT,
                Some(EventId(9))
            ),
            Err(ROLE_FORBIDDEN)
        );
    }

    #[test]
    fn plain_viewer_cannot_escalate_via_querystring() {
        for requested in [SocketRole::Moderator, SocketRole::Speaker, SocketRole::Reports] {
            assert_eq!(
                resolve_role(requested, GlobalRole::Viewer, None, EVENT, EVENT),
                Err(ROLE_FORBIDDEN)
            );
        }
    }
}
