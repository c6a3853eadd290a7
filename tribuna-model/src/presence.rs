use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// One row of the staff-facing active-sessions view. Timestamps are already
/// formatted in the event's timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveViewer {
    pub user_id: UserId,
    pub user_name: String,
    pub chat_blocked: bool,
    pub qa_blocked: bool,
    pub banned: bool,
    pub start_time: Option<String>,
    pub last_ping: Option<String>,
    pub session_minutes: i64,
}

/// One chat line as cached in the per-event recent ring and replayed to the
/// watch page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageView {
    pub user: String,
    pub user_id: UserId,
    pub message: String,
    pub timestamp: String,
}

/// A single labelled numeric series over time buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: Vec<String>,
    pub series: Vec<i64>,
}

/// Chat and question activity over the same time buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementSeries {
    pub labels: Vec<String>,
    pub chat: Vec<i64>,
    pub questions: Vec<i64>,
}

/// The charts payload pushed to reports dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportsCharts {
    pub active_participants: TimeSeries,
    pub engagement: EngagementSeries,
    pub question_status: TimeSeries,
    pub retention: TimeSeries,
}

/// The full memoized snapshot for one event, as cached under
/// `reports:snapshot:{event_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsSnapshot {
    pub active_sessions: Vec<LiveViewer>,
    pub total_registered_users: u64,
    pub live_watchers_count: u64,
    pub total_minutes_consumed: u64,
    pub charts: ReportsCharts,
}
