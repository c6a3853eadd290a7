//! Core services for the Tribuna live-event platform.
//!
//! Sessions, presence, message validation, the question pipeline, the poll
//! engine, and audience analytics — everything the realtime gateway
//! dispatches into. Durable rows live in Postgres; latency-critical state
//! lives in the Redis hot store.

pub mod analytics;
pub mod chat;
pub mod clock;
pub mod db;
pub mod error;
pub mod events;
pub mod hot;
pub mod polls;
pub mod presence;
pub mod questions;
pub mod sessions;
pub mod users;
pub mod validate;

pub use error::{CoreError, Result};
pub use hot::HotStore;
