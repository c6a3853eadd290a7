//! Snapshot publisher: recomputes the derived audience views and pushes them
//! to reports and moderator sockets.
//!
//! Runs on a fixed cadence over the events with locally registered sockets,
//! and immediately on explicit triggers from mutations (socket open/close,
//! chat, Q&A transitions, poll lifecycle). A short-TTL cache per event
//! absorbs bursty trigger rates; snapshot failures are contained per event.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use tribuna_core::error::Result as CoreResult;
use tribuna_core::hot::keys;
use tribuna_model::{EventId, OutboundFrame, ReportsSnapshot, SocketRole};

use crate::infra::app_state::AppState;

/// Trigger backlog. Overflow just drops the trigger: the periodic tick and
/// the cache make every drop harmless.
const TRIGGER_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    tx: mpsc::Sender<Option<EventId>>,
}

impl SnapshotHandle {
    /// Ask for a refresh of one event, or of every locally active event.
    pub fn trigger(&self, event_id: Option<EventId>) {
        let _ = self.tx.try_send(event_id);
    }
}

/// Create the trigger handle and its receiver; the run loop is spawned once
/// the full state exists.
pub fn channel() -> (SnapshotHandle, mpsc::Receiver<Option<EventId>>) {
    let (tx, rx) = mpsc::channel(TRIGGER_BUFFER);
    (SnapshotHandle { tx }, rx)
}

pub fn spawn(state: AppState, rx: mpsc::Receiver<Option<EventId>>) {
    tokio::spawn(run(state, rx));
}

async fn run(state: AppState, mut rx: mpsc::Receiver<Option<EventId>>) {
    let mut tick =
        tokio::time::interval(Duration::from_secs(state.config.realtime.snapshot_interval_secs.max(1)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => publish_all(&state).await,
            trigger = rx.recv() => match trigger {
                Some(Some(event_id)) => publish_for(&state, event_id).await,
                Some(None) => publish_all(&state).await,
                None => break,
            },
        }
    }
}

/// The periodic tick covers exactly the events this instance has sockets
/// for; it never enumerates all events globally.
async fn publish_all(state: &AppState) {
    for event_id in state.hub.local_event_ids() {
        publish_for(state, event_id).await;
    }
}

async fn publish_for(state: &AppState, event_id: EventId) {
    if let Err(err) = try_publish(state, event_id).await {
        warn!(event = %event_id, error = %err, "snapshot publish failed");
    }
}

async fn try_publish(state: &AppState, event_id: EventId) -> CoreResult<()> {
    let ttl = state.config.realtime.reports_cache_ttl_secs;
    let cache_key = keys::reports_snapshot(event_id);

    if ttl > 0 {
        match state.cache.get_json::<ReportsSnapshot>(&cache_key).await {
            Ok(Some(snapshot)) => {
                debug!(event = %event_id, "serving cached snapshot");
                emit(state, event_id, &snapshot).await;
                return Ok(());
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "snapshot cache read failed"),
        }
    }

    let tz = state.event_timezone(Some(event_id)).await;
    let snapshot = state.analytics.snapshot(event_id, tz.as_deref()).await?;
    emit(state, event_id, &snapshot).await;

    if ttl > 0
        && let Err(err) = state.cache.set_json_ex(&cache_key, &snapshot, ttl).await
    {
        warn!(error = %err, "snapshot cache write failed");
    }

    debug!(
        event = %event_id,
        active = snapshot.live_watchers_count,
        "snapshot published"
    );
    Ok(())
}

async fn emit(state: &AppState, event_id: EventId, snapshot: &ReportsSnapshot) {
    let sessions = OutboundFrame::ActiveSessions {
        sessions: snapshot.active_sessions.clone(),
    };
    state
        .broadcast(&sessions, Some(&[SocketRole::Reports]), Some(event_id))
        .await;
    state
        .broadcast(&sessions, Some(&[SocketRole::Moderator]), Some(event_id))
        .await;

    state
        .broadcast(
            &OutboundFrame::ReportsMetrics {
                total_registered_users: snapshot.total_registered_users,
                live_watchers_count: snapshot.live_watchers_count,
                total_minutes_consumed: snapshot.total_minutes_consumed,
            },
            Some(&[SocketRole::Reports]),
            Some(event_id),
        )
        .await;

    state
        .broadcast(
            &OutboundFrame::ReportsCharts(snapshot.charts.clone()),
            Some(&[SocketRole::Reports]),
            Some(event_id),
        )
        .await;
}
