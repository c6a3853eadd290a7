//! Fan-out behavior of the broadcast hub: event scoping, role targeting,
//! pruning of dead sockets, and event kicks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tribuna_model::{EventId, OutboundFrame, QuestionId, QuestionView, SocketRole, UserId};
use tribuna_server::ws::hub::{BroadcastHub, SocketCommand, SocketHandle};

fn chat(message: &str) -> OutboundFrame {
    OutboundFrame::Chat {
        user: "V1".to_string(),
        user_id: UserId::new(1),
        message: message.to_string(),
        timestamp: "12:00".to_string(),
    }
}

fn next_frame(rx: &mut mpsc::Receiver<SocketCommand>) -> Option<serde_json::Value> {
    match rx.try_recv().ok()? {
        SocketCommand::Frame(text) => serde_json::from_str(&text).ok(),
        SocketCommand::Close(_) => None,
    }
}

#[tokio::test]
async fn chat_fans_out_only_to_the_producing_event() {
    let hub = BroadcastHub::new();
    let (v1, mut rx1) =
        SocketHandle::channel(UserId::new(1), "V1".into(), SocketRole::Viewer, Some(EventId::new(1)));
    let (v2, mut rx2) =
        SocketHandle::channel(UserId::new(2), "V2".into(), SocketRole::Viewer, Some(EventId::new(2)));
    hub.register(v1);
    hub.register(v2);

    let sent = hub.local_broadcast(&chat("hello"), None, Some(EventId::new(1)));
    assert_eq!(sent, 1);

    let frame = next_frame(&mut rx1).expect("viewer on event 1 receives the chat");
    assert_eq!(frame["type"], "chat");
    assert_eq!(frame["message"], "hello");

    assert!(rx2.try_recv().is_err(), "viewer on event 2 must receive nothing");
}

#[tokio::test]
async fn role_targeting_excludes_other_roles() {
    let hub = BroadcastHub::new();
    let event = Some(EventId::new(7));
    let (viewer, mut viewer_rx) =
        SocketHandle::channel(UserId::new(1), "V".into(), SocketRole::Viewer, event);
    let (moderator, mut moderator_rx) =
        SocketHandle::channel(UserId::new(2), "M".into(), SocketRole::Moderator, event);
    hub.register(viewer);
    hub.register(moderator);

    let frame = OutboundFrame::PendingQuestion(QuestionView {
        id: QuestionId::new(11),
        user: "U".to_string(),
        question: "¿por qué?".to_string(),
        timestamp: "12:30".to_string(),
    });
    let sent = hub.local_broadcast(&frame, Some(&[SocketRole::Moderator]), event);
    assert_eq!(sent, 1);

    let delivered = next_frame(&mut moderator_rx).expect("moderator receives the question");
    assert_eq!(delivered["type"], "pending_question");
    assert_eq!(delivered["id"], 11);

    assert!(viewer_rx.try_recv().is_err());
}

#[tokio::test]
async fn unspecified_roles_reach_every_registry() {
    let hub = BroadcastHub::new();
    let event = Some(EventId::new(3));
    let mut receivers = Vec::new();
    for (i, role) in SocketRole::ALL.into_iter().enumerate() {
        let (handle, rx) =
            SocketHandle::channel(UserId::new(i as i64 + 1), format!("U{i}"), role, event);
        hub.register(handle);
        receivers.push(rx);
    }

    let sent = hub.local_broadcast(&chat("todos"), None, event);
    assert_eq!(sent, 4);
    for rx in &mut receivers {
        assert!(next_frame(rx).is_some());
    }
}

#[tokio::test]
async fn dead_sockets_are_pruned_on_send() {
    let hub = BroadcastHub::new();
    let event = Some(EventId::new(5));
    let (gone, gone_rx) =
        SocketHandle::channel(UserId::new(1), "gone".into(), SocketRole::Viewer, event);
    hub.register(gone);
    drop(gone_rx);

    let sent = hub.local_broadcast(&chat("anyone?"), None, event);
    assert_eq!(sent, 0);
    // After a socket closes, no further envelope is written to it.
    assert!(!hub.has_event_sockets(EventId::new(5)));
}

#[tokio::test]
async fn kick_event_closes_only_that_events_sockets() {
    let hub = BroadcastHub::new();
    let (v1, mut rx1) =
        SocketHandle::channel(UserId::new(1), "V1".into(), SocketRole::Viewer, Some(EventId::new(1)));
    let (v2, mut rx2) =
        SocketHandle::channel(UserId::new(2), "V2".into(), SocketRole::Viewer, Some(EventId::new(2)));
    hub.register(v1);
    hub.register(v2);

    let frame = OutboundFrame::EventClosed {
        message: "Esta transmisión ha finalizado.".to_string(),
    };
    let kicked = hub.kick_event(EventId::new(1), &frame);
    assert_eq!(kicked, 1);

    let delivered = next_frame(&mut rx1).expect("kicked socket sees the closing envelope");
    assert_eq!(delivered["type"], "event_closed");
    assert!(matches!(rx1.try_recv(), Ok(SocketCommand::Close(_))));

    assert!(rx2.try_recv().is_err());
    assert!(!hub.has_event_sockets(EventId::new(1)));
    assert!(hub.has_event_sockets(EventId::new(2)));
}

#[tokio::test]
async fn local_event_ids_reflect_registered_sockets() {
    let hub = Arc::new(BroadcastHub::new());
    assert!(hub.local_event_ids().is_empty());

    let (v1, _rx1) =
        SocketHandle::channel(UserId::new(1), "V1".into(), SocketRole::Viewer, Some(EventId::new(1)));
    let (m1, _rx2) = SocketHandle::channel(
        UserId::new(2),
        "M1".into(),
        SocketRole::Moderator,
        Some(EventId::new(2)),
    );
    let id = v1.id;
    hub.register(v1);
    hub.register(m1);

    let ids: Vec<i64> = hub.local_event_ids().iter().map(|e| e.as_i64()).collect();
    assert_eq!(ids, vec![1, 2]);

    hub.unregister(SocketRole::Viewer, id);
    let ids: Vec<i64> = hub.local_event_ids().iter().map(|e| e.as_i64()).collect();
    assert_eq!(ids, vec![2]);
}
