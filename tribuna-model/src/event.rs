use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EventId;

/// Lifecycle of an event. Transitions are monotonic except that a published
/// event may be toggled back and forth with closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Published,
    Closed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Published => "published",
            EventStatus::Closed => "closed",
        }
    }
}

/// How the registration flow admits viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    Open,
    Restricted,
}

/// One field of the event's registration form, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// The event descriptor as the realtime core consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub slug: String,
    pub title: String,
    pub video_url: Option<String>,
    pub status: EventStatus,
    pub registration_mode: Option<RegistrationMode>,
    pub registration_opens_at: Option<DateTime<Utc>>,
    pub registration_closes_at: Option<DateTime<Utc>>,
    pub access_open_at: Option<DateTime<Utc>>,
    pub capacity: Option<i32>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub registration_schema: Vec<RegistrationField>,
    pub registration_success_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Whether viewers may still be on the socket for this event.
    pub fn is_live(&self) -> bool {
        self.status == EventStatus::Published
    }
}
