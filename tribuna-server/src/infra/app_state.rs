use std::fmt;
use std::sync::Arc;

use sqlx::PgPool;
use tracing::warn;

use tribuna_core::analytics::AnalyticsService;
use tribuna_core::chat::ChatService;
use tribuna_core::error::Result as CoreResult;
use tribuna_core::events::EventService;
use tribuna_core::hot::{HotStore, keys};
use tribuna_core::polls::PollService;
use tribuna_core::presence::PresenceTracker;
use tribuna_core::questions::QuestionService;
use tribuna_core::sessions::SessionStore;
use tribuna_core::users::UserService;
use tribuna_core::validate::MessageValidator;
use tribuna_model::{Event, EventId, EventStatus, OutboundFrame, SocketRole};

use crate::infra::config::Config;
use crate::snapshot::SnapshotHandle;
use crate::ws::poll_timers::PollAutoClose;
use crate::ws::relay::{RelayEnvelope, RelayHandle};
use crate::ws::hub::BroadcastHub;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    /// Cache-side hot store: live polls, rings, snapshot caches, validator
    /// counters, and the broadcast channels.
    pub cache: HotStore,
    pub sessions: SessionStore,
    pub presence: PresenceTracker,
    pub validator: MessageValidator,
    pub questions: QuestionService,
    pub polls: PollService,
    pub chat: ChatService,
    pub events: EventService,
    pub users: UserService,
    pub analytics: AnalyticsService,
    pub hub: Arc<BroadcastHub>,
    pub relay: RelayHandle,
    pub poll_timers: Arc<PollAutoClose>,
    pub snapshots: SnapshotHandle,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Publish on the event channel (when enabled), then fan out locally.
    /// Ordering holds per event because every envelope for one event goes
    /// through the same channel and the same local registries.
    pub async fn broadcast(
        &self,
        frame: &OutboundFrame,
        roles: Option<&[SocketRole]>,
        event_id: Option<EventId>,
    ) -> usize {
        if let Some(event_id) = event_id {
            self.publish_envelope(frame, roles, event_id).await;
        }
        self.hub.local_broadcast(frame, roles, event_id)
    }

    async fn publish_envelope(
        &self,
        frame: &OutboundFrame,
        roles: Option<&[SocketRole]>,
        event_id: EventId,
    ) {
        if !self.config.realtime.broadcast_pubsub {
            return;
        }

        let envelope = match serde_json::to_value(frame) {
            Ok(payload) => RelayEnvelope {
                event_id,
                roles: roles.map(|roles| roles.to_vec()),
                payload,
            },
            Err(err) => {
                warn!(error = %err, "failed to serialize broadcast payload");
                return;
            }
        };

        match serde_json::to_string(&envelope) {
            Ok(json) => {
                if let Err(err) = self
                    .cache
                    .publish(&keys::broadcast_channel(event_id), &json)
                    .await
                {
                    warn!(error = %err, "broadcast publish failed");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize relay envelope"),
        }
    }

    /// Transition the event to closed and terminate its sockets — locally
    /// and, via the event channel, on every other instance.
    pub async fn close_event(&self, event_id: EventId) -> CoreResult<Event> {
        let event = self.events.set_status(event_id, EventStatus::Closed).await?;

        let frame = OutboundFrame::EventClosed {
            message: "Esta transmisión ha finalizado.".to_string(),
        };
        self.publish_envelope(&frame, None, event_id).await;
        let kicked = self.hub.kick_event(event_id, &frame);
        tracing::info!(event = %event_id, kicked, "event closed");

        Ok(event)
    }

    /// The event's display timezone, if it has one configured.
    pub async fn event_timezone(&self, event_id: Option<EventId>) -> Option<String> {
        let event_id = event_id?;
        match self.events.get(event_id).await {
            Ok(event) => event.and_then(|event| event.timezone),
            Err(err) => {
                warn!(error = %err, "event timezone lookup failed");
                None
            }
        }
    }
}
