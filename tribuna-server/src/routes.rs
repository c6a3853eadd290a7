//! Router assembly: the socket endpoint, the heartbeat fallback, and the
//! staff JSON API.

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api;
use crate::infra::app_state::AppState;
use crate::ws::gateway::ws_handler;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/ws", get(ws_handler))
        .route("/api/ping", post(api::ping))
        .route("/api/logout", post(api::logout))
        .route("/api/events/by-slug/{slug}", get(api::watch::event_by_slug))
        .route("/api/events/{event_id}/watch", get(api::watch::watch_bundle))
        .route(
            "/api/events/{event_id}/questions",
            get(api::questions::question_boards),
        )
        .route(
            "/api/events/{event_id}/polls",
            get(api::polls::list_polls).post(api::polls::create_poll),
        )
        .route("/api/events/{event_id}/close", post(api::admin::close_event))
        .route(
            "/api/events/{event_id}/staff",
            get(api::admin::list_staff).post(api::admin::upsert_staff),
        )
        .route(
            "/api/events/{event_id}/staff/{user_id}",
            delete(api::admin::remove_staff),
        )
        .route("/api/polls/{poll_id}", post(api::polls::update_poll))
        .route(
            "/api/polls/{poll_id}/status",
            post(api::polls::update_poll_status),
        )
        .route("/api/polls/{poll_id}/results", get(api::polls::poll_results))
        .route("/api/users/{user_id}/flags", post(api::admin::set_user_flags))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
