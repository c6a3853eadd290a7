//! Process-local broadcast fabric: per-role socket registries with
//! event-scoped fan-out.
//!
//! The hub owns the only mutable in-process state of the fabric. Payloads are
//! serialized once per broadcast; delivery to each socket goes through its
//! bounded writer channel and never blocks the caller. A socket whose channel
//! has closed is pruned on the spot.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use tribuna_model::{EventId, OutboundFrame, SocketRole, UserId};

/// Writer-task commands for one socket.
#[derive(Debug, Clone)]
pub enum SocketCommand {
    /// One serialized envelope to write.
    Frame(Arc<str>),
    /// Write a close frame (optionally with an application close code) and
    /// stop.
    Close(Option<(u16, &'static str)>),
}

/// Per-socket writer capacity. A client that cannot drain this many frames
/// gets frames dropped, not the whole instance stalled.
pub const SOCKET_BUFFER: usize = 256;

/// One registered socket: identity, bound role and event, and the channel
/// feeding its writer task.
pub struct SocketHandle {
    pub id: Uuid,
    pub user_id: UserId,
    pub user_name: String,
    pub role: SocketRole,
    pub event_id: Option<EventId>,
    sender: mpsc::Sender<SocketCommand>,
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("event_id", &self.event_id)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl SocketHandle {
    /// Build a handle plus the receiving end for its writer task.
    pub fn channel(
        user_id: UserId,
        user_name: String,
        role: SocketRole,
        event_id: Option<EventId>,
    ) -> (Arc<Self>, mpsc::Receiver<SocketCommand>) {
        let (sender, receiver) = mpsc::channel(SOCKET_BUFFER);
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id,
            user_name,
            role,
            event_id,
            sender,
        });
        (handle, receiver)
    }

    /// Queue a command without blocking. Returns false when the socket is
    /// gone and should be pruned.
    pub fn send(&self, command: SocketCommand) -> bool {
        match self.sender.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(socket = %self.id, "socket writer backlogged; dropping frame");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Serialize and queue one envelope for this socket alone.
    pub fn send_frame(&self, frame: &OutboundFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send(SocketCommand::Frame(Arc::from(json.as_str()))),
            Err(err) => {
                warn!(error = %err, "failed to serialize envelope");
                true
            }
        }
    }
}

/// Per-role client registries for one instance.
pub struct BroadcastHub {
    registries: DashMap<SocketRole, Vec<Arc<SocketHandle>>>,
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts = f.debug_struct("BroadcastHub");
        for role in SocketRole::ALL {
            let len = self.registries.get(&role).map(|s| s.len()).unwrap_or(0);
            counts.field(role.as_str(), &len);
        }
        counts.finish()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        let registries = DashMap::new();
        for role in SocketRole::ALL {
            registries.insert(role, Vec::new());
        }
        Self { registries }
    }

    pub fn register(&self, handle: Arc<SocketHandle>) {
        self.registries
            .entry(handle.role)
            .or_default()
            .push(handle);
    }

    pub fn unregister(&self, role: SocketRole, id: Uuid) {
        if let Some(mut sockets) = self.registries.get_mut(&role) {
            sockets.retain(|socket| socket.id != id);
        }
    }

    /// Serialize once and deliver to every socket in the target roles whose
    /// bound event matches. Returns how many sockets got the frame.
    pub fn local_broadcast(
        &self,
        frame: &OutboundFrame,
        roles: Option<&[SocketRole]>,
        event_id: Option<EventId>,
    ) -> usize {
        let text = match serde_json::to_string(frame) {
            Ok(json) => Arc::<str>::from(json.as_str()),
            Err(err) => {
                warn!(error = %err, "failed to serialize envelope");
                return 0;
            }
        };
        let sent = self.local_broadcast_text(text, roles, event_id);
        debug!(kind = frame.kind(), sent, "broadcast delivered");
        sent
    }

    /// Fan out an already-serialized envelope (the relay path).
    pub fn local_broadcast_text(
        &self,
        text: Arc<str>,
        roles: Option<&[SocketRole]>,
        event_id: Option<EventId>,
    ) -> usize {
        let target_roles: &[SocketRole] = roles.unwrap_or(&SocketRole::ALL);
        let mut sent = 0;

        for role in target_roles {
            // Iteration takes a copy; registry mutation never races delivery.
            let sockets: Vec<Arc<SocketHandle>> = match self.registries.get(role) {
                Some(entry) => entry.value().clone(),
                None => continue,
            };

            let mut dead = Vec::new();
            for socket in sockets {
                if event_id.is_some() && socket.event_id != event_id {
                    continue;
                }
                if socket.send(SocketCommand::Frame(text.clone())) {
                    sent += 1;
                } else {
                    dead.push(socket.id);
                }
            }

            if !dead.is_empty()
                && let Some(mut entry) = self.registries.get_mut(role)
            {
                entry.retain(|socket| !dead.contains(&socket.id));
            }
        }

        sent
    }

    /// Write a closing envelope to every socket bound to the event, then
    /// close and deregister them. Used when an event transitions to closed.
    pub fn kick_event(&self, event_id: EventId, frame: &OutboundFrame) -> usize {
        let text = match serde_json::to_string(frame) {
            Ok(json) => Arc::<str>::from(json.as_str()),
            Err(err) => {
                warn!(error = %err, "failed to serialize kick envelope");
                return 0;
            }
        };

        let mut kicked = 0;
        for role in SocketRole::ALL {
            let sockets: Vec<Arc<SocketHandle>> = match self.registries.get(&role) {
                Some(entry) => entry.value().clone(),
                None => continue,
            };

            let mut gone = Vec::new();
            for socket in sockets {
                if socket.event_id != Some(event_id) {
                    continue;
                }
                socket.send(SocketCommand::Frame(text.clone()));
                socket.send(SocketCommand::Close(None));
                gone.push(socket.id);
                kicked += 1;
            }

            if !gone.is_empty()
                && let Some(mut entry) = self.registries.get_mut(&role)
            {
                entry.retain(|socket| !gone.contains(&socket.id));
            }
        }

        kicked
    }

    /// Whether any local socket is still bound to the event; governs the
    /// pub/sub channel subscription.
    pub fn has_event_sockets(&self, event_id: EventId) -> bool {
        self.registries.iter().any(|entry| {
            entry
                .value()
                .iter()
                .any(|socket| socket.event_id == Some(event_id))
        })
    }

    /// Events with at least one locally registered socket. The periodic
    /// snapshot tick runs over exactly this set — never all events globally.
    pub fn local_event_ids(&self) -> BTreeSet<EventId> {
        let mut ids = BTreeSet::new();
        for entry in self.registries.iter() {
            for socket in entry.value() {
                if let Some(event_id) = socket.event_id {
                    ids.insert(event_id);
                }
            }
        }
        ids
    }
}
