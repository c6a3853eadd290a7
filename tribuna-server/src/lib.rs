//! # Tribuna Server
//!
//! Multi-tenant live-event platform: for each configured event it hosts a
//! realtime audience over long-lived WebSockets, relays chat, moderates a
//! question-and-answer pipeline, runs live polls, and pushes continuously
//! updated audience analytics to staff dashboards.
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - PostgreSQL for durable rows (questions, chat history, vote audit,
//!   session analytics)
//! - Redis for sessions, presence, live poll state, and the cross-instance
//!   broadcast backbone

/// HTTP side channel: heartbeat fallback and the staff JSON API
pub mod api;

/// Config, shared state, and HTTP error mapping
pub mod infra;

/// Router assembly
pub mod routes;

/// Periodic and triggered derived-view publishing
pub mod snapshot;

/// Socket gateway, broadcast hub, pub/sub relay, poll timers
pub mod ws;
