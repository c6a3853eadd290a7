use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EventId, PollId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Draft,
    Published,
    Closed,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Draft => "draft",
            PollStatus::Published => "published",
            PollStatus::Closed => "closed",
        }
    }
}

/// A poll as stored durably. Options keep their authored order; votes refer
/// to them by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRecord {
    pub id: PollId,
    pub event_id: EventId,
    pub question: String,
    pub options: Vec<String>,
    pub status: PollStatus,
    pub close_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The live descriptor installed in the hot store while a poll is running.
/// At most one exists per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePoll {
    pub poll_id: PollId,
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub close_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<BTreeMap<usize, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_votes: Option<u64>,
}

/// Running tally broadcast after each accepted vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollTally {
    pub poll_id: PollId,
    pub results: BTreeMap<usize, u64>,
    pub total_votes: u64,
}

/// The final snapshot broadcast on close and flushed to the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResults {
    pub poll_id: PollId,
    pub question: String,
    pub options: Vec<String>,
    pub results: BTreeMap<usize, u64>,
    pub total_votes: u64,
}

/// One labelled row of a closed poll's stored results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOptionResult {
    pub option: String,
    pub votes: u64,
    pub option_index: usize,
}
