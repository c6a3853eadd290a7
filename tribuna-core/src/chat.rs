//! Chat: a bounded per-event ring of recent lines in the hot store, with the
//! full history persisted as write-behind work.
//!
//! The ring is authoritative for recency; losing a durable write never
//! removes a message viewers already saw.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use tribuna_model::{ChatMessageView, EventId, UserId};

use crate::clock::{format_local, now_hhmm};
use crate::error::Result;
use crate::hot::{HotStore, keys};

pub const CHAT_RING_MAX: usize = 100;

#[derive(Clone, Debug)]
pub struct ChatService {
    pool: PgPool,
    hot: HotStore,
    ring_max: usize,
}

impl ChatService {
    pub fn new(pool: PgPool, hot: HotStore) -> Self {
        Self {
            pool,
            hot,
            ring_max: CHAT_RING_MAX,
        }
    }

    pub fn with_ring_max(mut self, ring_max: usize) -> Self {
        self.ring_max = ring_max;
        self
    }

    /// Build the broadcast view and cache it in the recent ring. The durable
    /// insert happens separately via [`ChatService::persist`].
    pub async fn append(
        &self,
        user_id: UserId,
        user_name: &str,
        text: &str,
        event_id: EventId,
        tz_name: Option<&str>,
    ) -> ChatMessageView {
        let view = ChatMessageView {
            user: user_name.to_string(),
            user_id,
            message: text.to_string(),
            timestamp: now_hhmm(tz_name),
        };

        match serde_json::to_string(&view) {
            Ok(json) => {
                if let Err(err) = self
                    .hot
                    .push_ring(&keys::chat_ring(event_id), &json, self.ring_max)
                    .await
                {
                    warn!(error = %err, "chat ring push failed");
                }
            }
            Err(err) => warn!(error = %err, "chat view serialization failed"),
        }

        view
    }

    /// Write-behind durable insert of one chat line.
    pub async fn persist(&self, user_id: UserId, text: &str, event_id: EventId) -> Result<()> {
        sqlx::query("INSERT INTO chat_messages (user_id, message, event_id) VALUES ($1, $2, $3)")
            .bind(user_id.as_i64())
            .bind(text)
            .bind(event_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Recent lines in chronological order: the hot ring when populated,
    /// otherwise durable history.
    pub async fn recent(
        &self,
        event_id: EventId,
        limit: usize,
        tz_name: Option<&str>,
    ) -> Result<Vec<ChatMessageView>> {
        match self.hot.ring(&keys::chat_ring(event_id), limit).await {
            Ok(raw) if !raw.is_empty() => {
                let mut views: Vec<ChatMessageView> = raw
                    .iter()
                    .filter_map(|json| serde_json::from_str(json).ok())
                    .collect();
                views.reverse();
                return Ok(views);
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "chat ring read failed; falling back to history"),
        }

        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT u.name AS user_name, cm.user_id, cm.message, cm.created_at \
             FROM chat_messages cm \
             JOIN users u ON u.id = cm.user_id \
             WHERE cm.event_id = $1 \
             ORDER BY cm.id DESC LIMIT $2",
        )
        .bind(event_id.as_i64())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|row| ChatMessageView {
                user: row.user_name,
                user_id: UserId::new(row.user_id),
                message: row.message,
                timestamp: format_local(row.created_at, tz_name),
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    user_name: String,
    user_id: i64,
    message: String,
    created_at: DateTime<Utc>,
}
