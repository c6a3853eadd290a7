use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EventId, QuestionId, UserId};

/// Question pipeline states. A rejected question is deleted outright and has
/// no state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Pending,
    Approved,
    Read,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Pending => "pending",
            QuestionStatus::Approved => "approved",
            QuestionStatus::Read => "read",
        }
    }
}

/// A question row as stored durably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: QuestionId,
    pub event_id: Option<EventId>,
    pub user_id: Option<UserId>,
    pub user_name: String,
    pub question_text: String,
    pub status: QuestionStatus,
    pub created_at: DateTime<Utc>,
}

/// The shape every question envelope carries. When the question was imported
/// with a manual author name, `user` holds that name instead of the account's
/// display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: QuestionId,
    pub user: String,
    pub question: String,
    pub timestamp: String,
}

/// Moderator/speaker board listing, grouped by state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionBoards {
    pub pending: Vec<QuestionView>,
    pub approved: Vec<QuestionView>,
    pub read: Vec<QuestionView>,
}
