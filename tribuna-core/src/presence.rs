//! Sliding-window presence (hot store, logical db 2) with throttled durable
//! writeback.
//!
//! The sorted set `activity:{event_id}` is authoritative for "who is live
//! right now"; `session_analytics` rows are authoritative for "who ever
//! participated and for how long". A naive per-ping durable write would
//! flood the database at tens of thousands of viewers, so durable last-seen
//! advances at most once per `writeback_secs` per (event, user).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use tribuna_model::{EventId, LiveViewer, UserId};

use crate::clock::format_local;
use crate::error::Result;
use crate::hot::{HotStore, keys};

/// Window within which a user counts as live. Tolerant of slow networks.
pub const DEFAULT_ACTIVE_WINDOW_SECS: i64 = 600;

/// Minimum spacing of durable writebacks per (event, user).
pub const DEFAULT_WRITEBACK_SECS: i64 = 60;

#[derive(Clone, Debug)]
pub struct PresenceTracker {
    hot: HotStore,
    pool: PgPool,
    window_secs: i64,
    writeback_secs: i64,
}

impl PresenceTracker {
    pub fn new(hot: HotStore, pool: PgPool) -> Self {
        Self {
            hot,
            pool,
            window_secs: DEFAULT_ACTIVE_WINDOW_SECS,
            writeback_secs: DEFAULT_WRITEBACK_SECS,
        }
    }

    pub fn with_window(mut self, window_secs: i64) -> Self {
        self.window_secs = window_secs;
        self
    }

    pub fn with_writeback_interval(mut self, writeback_secs: i64) -> Self {
        self.writeback_secs = writeback_secs;
        self
    }

    fn now_ts() -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }

    /// Score the user as live now. Trimming happens on every write to bound
    /// memory.
    pub async fn mark_live(&self, event_id: EventId, user_id: UserId) -> Result<()> {
        let key = keys::activity(event_id);
        let now = Self::now_ts();
        self.hot.zadd(&key, &user_id.to_string(), now).await?;
        self.hot
            .ztrim_below(&key, now - self.window_secs as f64)
            .await?;
        Ok(())
    }

    /// Called when a viewer socket opens: live presence plus the durable
    /// analytics row the reports views join against.
    pub async fn ensure_session(&self, event_id: EventId, user_id: UserId) -> Result<()> {
        if let Err(err) = self.mark_live(event_id, user_id).await {
            warn!(error = %err, "presence mark_live failed on open");
        }

        sqlx::query(
            "INSERT INTO session_analytics (user_id, event_id, start_time, last_ping, total_minutes) \
             VALUES ($1, $2, now(), now(), 0) \
             ON CONFLICT (user_id, event_id) DO UPDATE SET last_ping = now()",
        )
        .bind(user_id.as_i64())
        .bind(event_id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove the user from the live set and force the durable last-seen
    /// backwards so window-based fallback queries stop counting them.
    pub async fn mark_inactive(&self, event_id: EventId, user_id: UserId) -> Result<()> {
        let key = keys::activity(event_id);
        if let Err(err) = self.hot.zrem(&key, &user_id.to_string()).await {
            warn!(error = %err, "presence zrem failed on close");
        }
        if let Err(err) = self
            .hot
            .delete(&keys::ping_writeback(event_id, user_id))
            .await
        {
            warn!(error = %err, "presence writeback-key delete failed");
        }

        sqlx::query(
            "UPDATE session_analytics SET last_ping = now() - INTERVAL '1 day' \
             WHERE user_id = $1 AND event_id = $2",
        )
        .bind(user_id.as_i64())
        .bind(event_id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Heartbeat: refresh live presence every time, advance the durable row
    /// at most once per writeback interval.
    pub async fn record_ping(&self, event_id: EventId, user_id: UserId) -> Result<()> {
        let now = Self::now_ts();
        self.mark_live(event_id, user_id).await?;

        let throttle_key = keys::ping_writeback(event_id, user_id);
        let last = self
            .hot
            .get_string(&throttle_key)
            .await?
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(0.0);

        if now - last >= self.writeback_secs as f64 {
            sqlx::query(
                "UPDATE session_analytics \
                 SET last_ping = now(), total_minutes = total_minutes + 1 \
                 WHERE user_id = $1 AND event_id = $2",
            )
            .bind(user_id.as_i64())
            .bind(event_id.as_i64())
            .execute(&self.pool)
            .await?;

            self.hot
                .set_ex_string(&throttle_key, &now.to_string(), self.window_secs as u64)
                .await?;
        }

        Ok(())
    }

    /// User ids with activity inside the window, newest scores included.
    pub async fn list_live(&self, event_id: EventId, window_secs: Option<i64>) -> Result<Vec<UserId>> {
        let window = window_secs.unwrap_or(self.window_secs);
        let cutoff = Self::now_ts() - window as f64;
        let members = self
            .hot
            .zrange_from(&keys::activity(event_id), cutoff)
            .await?;
        Ok(members
            .into_iter()
            .filter_map(|member| member.parse::<i64>().ok().map(UserId::new))
            .collect())
    }

    /// Join the live set against durable user rows. Staff accounts and
    /// non-viewer roles are excluded from the audience view.
    pub async fn list_live_details(
        &self,
        event_id: EventId,
        tz_name: Option<&str>,
    ) -> Result<Vec<LiveViewer>> {
        let live = self.list_live(event_id, None).await?;
        if live.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = live.iter().map(|id| id.as_i64()).collect();

        let rows: Vec<LiveViewerRow> = sqlx::query_as(
            "SELECT sa.user_id, u.name AS user_name, u.chat_blocked, u.qa_blocked, u.banned, \
                    sa.start_time, sa.last_ping, sa.total_minutes::BIGINT AS session_minutes \
             FROM session_analytics sa \
             JOIN users u ON u.id = sa.user_id \
             WHERE sa.event_id = $1 \
               AND sa.user_id = ANY($2) \
               AND u.role = 'viewer' \
               AND u.id NOT IN (SELECT user_id FROM event_staff WHERE event_id = $1) \
             ORDER BY sa.last_ping DESC",
        )
        .bind(event_id.as_i64())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LiveViewer {
                user_id: UserId::new(row.user_id),
                user_name: row.user_name,
                chat_blocked: row.chat_blocked,
                qa_blocked: row.qa_blocked,
                banned: row.banned,
                start_time: row.start_time.map(|at| format_local(at, tz_name)),
                last_ping: row.last_ping.map(|at| format_local(at, tz_name)),
                session_minutes: row.session_minutes,
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct LiveViewerRow {
    user_id: i64,
    user_name: String,
    chat_blocked: bool,
    qa_blocked: bool,
    banned: bool,
    start_time: Option<DateTime<Utc>>,
    last_ping: Option<DateTime<Utc>>,
    session_minutes: i64,
}
