use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{PollId, QuestionId, UserId};
use crate::poll::{FinalResults, LivePoll};
use crate::presence::{LiveViewer, ReportsCharts};
use crate::question::QuestionView;

/// Every frame a client may send on the socket. Parse failure is a
/// validation error answered with an [`OutboundFrame::Error`], never a
/// broadcast.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Chat {
        message: String,
    },
    Ask {
        question: String,
        #[serde(default)]
        manual_user: Option<String>,
    },
    Approve {
        id: QuestionId,
    },
    Reject {
        id: QuestionId,
    },
    Read {
        id: QuestionId,
    },
    ReturnToModerator {
        id: QuestionId,
    },
    Ping,
    /// Launch a pre-created poll by id, or start an ad-hoc one from
    /// question/options.
    PollStart {
        #[serde(default)]
        poll_id: Option<PollId>,
        #[serde(default)]
        question: Option<String>,
        #[serde(default)]
        options: Option<Vec<String>>,
        #[serde(default)]
        duration_minutes: Option<i64>,
    },
    PollVote {
        option_index: usize,
    },
    PollClose,
}

/// Every frame the platform emits through the broadcast fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Chat {
        user: String,
        user_id: UserId,
        message: String,
        timestamp: String,
    },
    PendingQuestion(QuestionView),
    ApprovedQuestion(QuestionView),
    QuestionRead(QuestionView),
    QuestionRemoved {
        id: QuestionId,
    },
    RejectedQuestion {
        id: QuestionId,
    },
    PollStart {
        poll: LivePoll,
    },
    PollUpdateResults {
        poll_id: PollId,
        results: BTreeMap<usize, u64>,
        total_votes: u64,
    },
    PollEnd {
        final_results: FinalResults,
    },
    ActiveSessions {
        sessions: Vec<LiveViewer>,
    },
    ReportsMetrics {
        total_registered_users: u64,
        live_watchers_count: u64,
        total_minutes_consumed: u64,
    },
    ReportsCharts(ReportsCharts),
    EventClosed {
        message: String,
    },
    ForceLogout {
        user_id: UserId,
    },
    Error {
        message: String,
    },
}

impl OutboundFrame {
    /// Short tag name, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Chat { .. } => "chat",
            OutboundFrame::PendingQuestion(_) => "pending_question",
            OutboundFrame::ApprovedQuestion(_) => "approved_question",
            OutboundFrame::QuestionRead(_) => "question_read",
            OutboundFrame::QuestionRemoved { .. } => "question_removed",
            OutboundFrame::RejectedQuestion { .. } => "rejected_question",
            OutboundFrame::PollStart { .. } => "poll_start",
            OutboundFrame::PollUpdateResults { .. } => "poll_update_results",
            OutboundFrame::PollEnd { .. } => "poll_end",
            OutboundFrame::ActiveSessions { .. } => "active_sessions",
            OutboundFrame::ReportsMetrics { .. } => "reports_metrics",
            OutboundFrame::ReportsCharts(_) => "reports_charts",
            OutboundFrame::EventClosed { .. } => "event_closed",
            OutboundFrame::ForceLogout { .. } => "force_logout",
            OutboundFrame::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn inbound_chat_parses() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"chat","message":"hola"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Chat {
                message: "hola".into()
            }
        );
    }

    #[test]
    fn inbound_ping_tolerates_extra_fields() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"ping","ts":123}"#).unwrap();
        assert_eq!(frame, InboundFrame::Ping);
    }

    #[test]
    fn inbound_ask_defaults_manual_user() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"ask","question":"¿por qué?"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Ask {
                question: "¿por qué?".into(),
                manual_user: None
            }
        );
    }

    #[test]
    fn inbound_poll_start_supports_both_shapes() {
        let by_id: InboundFrame =
            serde_json::from_str(r#"{"type":"poll_start","poll_id":4,"duration_minutes":1}"#)
                .unwrap();
        match by_id {
            InboundFrame::PollStart {
                poll_id,
                duration_minutes,
                ..
            } => {
                assert_eq!(poll_id, Some(PollId(4)));
                assert_eq!(duration_minutes, Some(1));
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let ad_hoc: InboundFrame = serde_json::from_str(
            r#"{"type":"poll_start","question":"¿a o b?","options":["a","b"]}"#,
        )
        .unwrap();
        match ad_hoc {
            InboundFrame::PollStart {
                poll_id, options, ..
            } => {
                assert_eq!(poll_id, None);
                assert_eq!(options.as_deref(), Some(["a".to_string(), "b".to_string()].as_slice()));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_inbound_type_is_rejected() {
        assert!(serde_json::from_str::<InboundFrame>(r#"{"type":"shutdown"}"#).is_err());
    }

    #[test]
    fn negative_option_index_is_rejected() {
        assert!(
            serde_json::from_str::<InboundFrame>(r#"{"type":"poll_vote","option_index":-1}"#)
                .is_err()
        );
    }

    #[test]
    fn outbound_question_view_fields_are_inlined() {
        let frame = OutboundFrame::PendingQuestion(QuestionView {
            id: QuestionId(9),
            user: "Ana".into(),
            question: "¿por qué?".into(),
            timestamp: "12:30".into(),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "pending_question");
        assert_eq!(value["id"], 9);
        assert_eq!(value["question"], "¿por qué?");
    }

    #[test]
    fn outbound_poll_start_round_trips() {
        let frame = OutboundFrame::PollStart {
            poll: LivePoll {
                poll_id: PollId(3),
                question: "¿a o b?".into(),
                options: vec!["a".into(), "b".into()],
                close_at: None,
                created_at: Utc::now(),
                results: None,
                total_votes: None,
            },
        };
        let text = serde_json::to_string(&frame).unwrap();
        let back: OutboundFrame = serde_json::from_str(&text).unwrap();
        match back {
            OutboundFrame::PollStart { poll } => assert_eq!(poll.poll_id, PollId(3)),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
