//! Cross-instance broadcast relay over per-event pub/sub channels.
//!
//! One dedicated task owns the subscription; producers only publish on the
//! event channel. Received envelopes re-enter the instance through a bounded
//! broadcast buffer that drops the oldest entries under overload instead of
//! blocking publishers, and a consumer task performs local fan-out only —
//! receivers never re-publish, so there are no loops.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use tribuna_core::hot::keys;
use tribuna_model::{EventId, OutboundFrame, SocketRole};

use crate::ws::hub::BroadcastHub;

/// The wire form published on `broadcast:event:{event_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub event_id: EventId,
    pub roles: Option<Vec<SocketRole>>,
    pub payload: serde_json::Value,
}

#[derive(Debug)]
enum RelayCommand {
    Subscribe(EventId),
    Unsubscribe(EventId),
}

/// Producer-side handle: ask the relay task to (un)subscribe event channels.
/// All sends are fire-and-forget; a dead or disabled relay just ignores them.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: Option<mpsc::UnboundedSender<RelayCommand>>,
}

impl RelayHandle {
    /// A handle that drops every command; used when pub/sub is disabled.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn subscribe(&self, event_id: EventId) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(RelayCommand::Subscribe(event_id));
        }
    }

    pub fn unsubscribe(&self, event_id: EventId) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(RelayCommand::Unsubscribe(event_id));
        }
    }
}

/// Spawn the relay listener and its fan-out consumer.
pub fn spawn(redis_url: String, hub: Arc<BroadcastHub>, buffer: usize) -> RelayHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (fan_tx, fan_rx) = broadcast::channel::<String>(buffer.max(16));

    tokio::spawn(consume(fan_rx, hub));
    tokio::spawn(listen(redis_url, cmd_rx, fan_tx));

    RelayHandle { tx: Some(cmd_tx) }
}

/// Fan received envelopes out to local sockets. Lag means the buffer
/// overflowed and the oldest envelopes were dropped.
async fn consume(mut fan_rx: broadcast::Receiver<String>, hub: Arc<BroadcastHub>) {
    loop {
        match fan_rx.recv().await {
            Ok(raw) => deliver(&hub, &raw),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                warn!(dropped = count, "relay buffer overflowed; dropped oldest envelopes");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn deliver(hub: &BroadcastHub, raw: &str) {
    let envelope: RelayEnvelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "unparseable relay envelope");
            return;
        }
    };

    // An event-closed envelope terminates this instance's sockets too.
    if envelope.payload.get("type").and_then(|t| t.as_str()) == Some("event_closed") {
        if let Ok(frame) = serde_json::from_value::<OutboundFrame>(envelope.payload.clone()) {
            let kicked = hub.kick_event(envelope.event_id, &frame);
            debug!(event = %envelope.event_id, kicked, "relayed event close");
            return;
        }
    }

    let text = Arc::<str>::from(envelope.payload.to_string().as_str());
    hub.local_broadcast_text(text, envelope.roles.as_deref(), Some(envelope.event_id));
}

/// Own the pub/sub connection; reconnect with the current subscription set
/// when it drops.
async fn listen(
    redis_url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<RelayCommand>,
    fan_tx: broadcast::Sender<String>,
) {
    let mut subscribed: HashSet<EventId> = HashSet::new();

    loop {
        let pubsub = match connect(&redis_url).await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                warn!(error = %err, "relay connect failed; retrying");
                // Keep draining commands so the subscription set stays current.
                if drain_until_deadline(&mut cmd_rx, &mut subscribed).await {
                    return;
                }
                continue;
            }
        };

        let (mut sink, mut stream) = pubsub.split();
        let mut healthy = true;
        for event_id in &subscribed {
            if let Err(err) = sink.subscribe(keys::broadcast_channel(*event_id)).await {
                warn!(error = %err, "relay resubscribe failed");
                healthy = false;
                break;
            }
        }
        if !healthy {
            continue;
        }
        info!(channels = subscribed.len(), "relay listener connected");

        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(RelayCommand::Subscribe(event_id)) => {
                        if subscribed.insert(event_id)
                            && let Err(err) = sink.subscribe(keys::broadcast_channel(event_id)).await
                        {
                            warn!(error = %err, "relay subscribe failed");
                            break;
                        }
                    }
                    Some(RelayCommand::Unsubscribe(event_id)) => {
                        if subscribed.remove(&event_id)
                            && let Err(err) = sink.unsubscribe(keys::broadcast_channel(event_id)).await
                        {
                            warn!(error = %err, "relay unsubscribe failed");
                            break;
                        }
                    }
                    None => return,
                },
                message = stream.next() => match message {
                    Some(message) => {
                        match message.get_payload::<String>() {
                            Ok(payload) => {
                                let _ = fan_tx.send(payload);
                            }
                            Err(err) => warn!(error = %err, "bad relay payload"),
                        }
                    }
                    None => {
                        warn!("relay connection lost; reconnecting");
                        break;
                    }
                },
            }
        }
    }
}

async fn connect(redis_url: &str) -> redis::RedisResult<redis::aio::PubSub> {
    let client = redis::Client::open(redis_url)?;
    client.get_async_pubsub().await
}

/// Wait out the reconnect backoff while still applying subscription changes.
/// Returns true when the command channel closed (shutdown).
async fn drain_until_deadline(
    cmd_rx: &mut mpsc::UnboundedReceiver<RelayCommand>,
    subscribed: &mut HashSet<EventId>,
) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            command = cmd_rx.recv() => match command {
                Some(RelayCommand::Subscribe(event_id)) => {
                    subscribed.insert(event_id);
                }
                Some(RelayCommand::Unsubscribe(event_id)) => {
                    subscribed.remove(&event_id);
                }
                None => return true,
            },
        }
    }
}
