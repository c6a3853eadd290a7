//! Event descriptors: lookup, status transitions, and registration-mode
//! resolution.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tribuna_model::{Event, EventId, EventStatus, RegistrationMode};

use crate::error::{CoreError, Result};

#[derive(Clone, Debug)]
pub struct EventService {
    pool: PgPool,
}

const EVENT_COLUMNS: &str = "id, slug, title, video_url, status, registration_mode, \
     registration_opens_at, registration_closes_at, access_open_at, capacity, timezone, \
     registration_schema, registration_success_message, created_at";

impl EventService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, event_id: EventId) -> Result<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 AND NOT deleted"
        ))
        .bind(event_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.map(EventRow::into_event).transpose()
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE slug = $1 AND NOT deleted"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.map(EventRow::into_event).transpose()
    }

    /// Status transitions are monotonic, except published and closed may
    /// toggle (reopening a stream that was closed by mistake).
    pub async fn set_status(&self, event_id: EventId, status: EventStatus) -> Result<Event> {
        let current = self
            .get(event_id)
            .await?
            .ok_or_else(|| CoreError::State("Evento no encontrado.".to_string()))?;

        let allowed = matches!(
            (current.status, status),
            (EventStatus::Draft, EventStatus::Published)
                | (EventStatus::Published, EventStatus::Closed)
                | (EventStatus::Closed, EventStatus::Published)
        ) || current.status == status;

        if !allowed {
            return Err(CoreError::State(format!(
                "Invalid event transition: {} -> {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        sqlx::query("UPDATE events SET status = $2 WHERE id = $1")
            .bind(event_id.as_i64())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(Event {
            status,
            ..current
        })
    }

    /// The canonical registration flow reads `registration_mode`; an event
    /// without one has no defined registration semantics and surfaces a
    /// configuration error instead of silently falling back to any legacy
    /// behavior.
    pub fn registration_mode(event: &Event) -> Result<RegistrationMode> {
        event.registration_mode.ok_or_else(|| {
            CoreError::Config(format!(
                "event {} has no registration_mode configured",
                event.id
            ))
        })
    }

    /// Whether registration is currently open, honoring the mode and window.
    pub fn registration_open(event: &Event, now: DateTime<Utc>) -> Result<bool> {
        // Mode must be configured even for the window check.
        let _mode = Self::registration_mode(event)?;

        if let Some(opens_at) = event.registration_opens_at
            && now < opens_at
        {
            return Ok(false);
        }
        if let Some(closes_at) = event.registration_closes_at
            && now > closes_at
        {
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(mode: Option<RegistrationMode>) -> Event {
        Event {
            id: EventId::new(1),
            slug: "demo".to_string(),
            title: "Demo".to_string(),
            video_url: None,
            status: EventStatus::Published,
            registration_mode: mode,
            registration_opens_at: None,
            registration_closes_at: None,
            access_open_at: None,
            capacity: None,
            timezone: None,
            registration_schema: Vec::new(),
            registration_success_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn missing_registration_mode_is_a_config_error() {
        let err = EventService::registration_mode(&event(None)).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));

        let mode = EventService::registration_mode(&event(Some(RegistrationMode::Open))).unwrap();
        assert_eq!(mode, RegistrationMode::Open);
    }

    #[test]
    fn registration_window_bounds_are_honored() {
        let mut open = event(Some(RegistrationMode::Restricted));
        open.registration_opens_at = Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
        open.registration_closes_at = Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());

        let before = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let during = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap();

        assert!(!EventService::registration_open(&open, before).unwrap());
        assert!(EventService::registration_open(&open, during).unwrap());
        assert!(!EventService::registration_open(&open, after).unwrap());

        // Without a configured mode, the window check must not silently
        // fall back to legacy behavior either.
        assert!(EventService::registration_open(&event(None), during).is_err());
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    slug: String,
    title: String,
    video_url: Option<String>,
    status: String,
    registration_mode: Option<String>,
    registration_opens_at: Option<DateTime<Utc>>,
    registration_closes_at: Option<DateTime<Utc>>,
    access_open_at: Option<DateTime<Utc>>,
    capacity: Option<i32>,
    timezone: Option<String>,
    registration_schema: Option<serde_json::Value>,
    registration_success_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl EventRow {
    fn into_event(self) -> Result<Event> {
        let status = match self.status.as_str() {
            "draft" => EventStatus::Draft,
            "published" => EventStatus::Published,
            "closed" => EventStatus::Closed,
            other => return Err(CoreError::State(format!("unknown event status: {other}"))),
        };

        let registration_mode = match self.registration_mode.as_deref() {
            None => None,
            Some("open") => Some(RegistrationMode::Open),
            Some("restricted") => Some(RegistrationMode::Restricted),
            Some(other) => {
                return Err(CoreError::Config(format!(
                    "unknown registration_mode: {other}"
                )));
            }
        };

        let registration_schema = match self.registration_schema {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };

        Ok(Event {
            id: EventId::new(self.id),
            slug: self.slug,
            title: self.title,
            video_url: self.video_url,
            status,
            registration_mode,
            registration_opens_at: self.registration_opens_at,
            registration_closes_at: self.registration_closes_at,
            access_open_at: self.access_open_at,
            capacity: self.capacity,
            timezone: self.timezone,
            registration_schema,
            registration_success_message: self.registration_success_message,
            created_at: self.created_at,
        })
    }
}
