//! Derived audience views: active sessions, headline metrics, and the
//! bucketed engagement charts pushed to reports dashboards.
//!
//! All series share one set of time buckets over a rolling window (default
//! 60 minutes in 5-minute steps), labelled in the event's timezone.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::PgPool;

use tribuna_model::{EngagementSeries, EventId, ReportsCharts, ReportsSnapshot, TimeSeries};

use crate::clock::target_timezone;
use crate::error::Result;
use crate::presence::PresenceTracker;
use crate::questions::QuestionService;

pub const CHART_WINDOW_MINUTES: i64 = 60;
pub const CHART_INTERVAL_MINUTES: i64 = 5;

const QUESTION_STATUS_LABELS: [&str; 4] = ["pending", "approved", "rejected", "read"];

#[derive(Clone, Debug)]
pub struct AnalyticsService {
    pool: PgPool,
    presence: PresenceTracker,
    questions: QuestionService,
}

impl AnalyticsService {
    pub fn new(pool: PgPool, presence: PresenceTracker) -> Self {
        let questions = QuestionService::new(pool.clone());
        Self {
            pool,
            presence,
            questions,
        }
    }

    /// Compute the full snapshot for one event. Staff users and non-viewer
    /// roles never appear in audience numbers.
    pub async fn snapshot(
        &self,
        event_id: EventId,
        tz_name: Option<&str>,
    ) -> Result<ReportsSnapshot> {
        let active_sessions = self.presence.list_live_details(event_id, tz_name).await?;
        let live_watchers_count = active_sessions.len() as u64;

        let total_registered_users = self.registered_viewer_count(event_id).await? as u64;
        let total_minutes_consumed = self.total_minutes(event_id).await? as u64;

        let charts = self
            .charts(event_id, tz_name, CHART_WINDOW_MINUTES, CHART_INTERVAL_MINUTES)
            .await?;

        Ok(ReportsSnapshot {
            active_sessions,
            total_registered_users,
            live_watchers_count,
            total_minutes_consumed,
            charts,
        })
    }

    /// Viewers registered to the event, regardless of activity.
    pub async fn registered_viewer_count(&self, event_id: EventId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM users u \
             WHERE u.event_id = $1 AND u.role = 'viewer' \
               AND u.id NOT IN (SELECT user_id FROM event_staff WHERE event_id = $1)",
        )
        .bind(event_id.as_i64())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Minutes consumed across every participant the event ever had.
    pub async fn total_minutes(&self, event_id: EventId) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(sa.total_minutes), 0)::BIGINT \
             FROM session_analytics sa \
             JOIN users u ON u.id = sa.user_id \
             WHERE sa.event_id = $1 AND u.role = 'viewer' \
               AND u.id NOT IN (SELECT user_id FROM event_staff WHERE event_id = $1)",
        )
        .bind(event_id.as_i64())
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    pub async fn charts(
        &self,
        event_id: EventId,
        tz_name: Option<&str>,
        window_minutes: i64,
        interval_minutes: i64,
    ) -> Result<ReportsCharts> {
        let window_minutes = window_minutes.max(10);
        let interval_minutes = interval_minutes.max(1);
        let bucket_secs = interval_minutes * 60;

        let end = Utc::now();
        let start = end - TimeDelta::minutes(window_minutes);
        let (labels, buckets) = build_time_labels(start, end, interval_minutes, tz_name);

        let active_map = self
            .bucketed(
                "SELECT (FLOOR(EXTRACT(EPOCH FROM sa.last_ping) / $1) * $1)::BIGINT AS bucket_epoch, \
                        COUNT(*)::BIGINT AS total \
                 FROM session_analytics sa \
                 JOIN users u ON u.id = sa.user_id \
                 WHERE sa.event_id = $2 AND u.role = 'viewer' \
                   AND sa.last_ping >= now() - ($3 * INTERVAL '1 minute') \
                   AND u.id NOT IN (SELECT user_id FROM event_staff WHERE event_id = $2) \
                 GROUP BY 1 ORDER BY 1",
                bucket_secs,
                event_id,
                window_minutes,
            )
            .await?;

        let chat_map = self
            .bucketed(
                "SELECT (FLOOR(EXTRACT(EPOCH FROM created_at) / $1) * $1)::BIGINT AS bucket_epoch, \
                        COUNT(*)::BIGINT AS total \
                 FROM chat_messages \
                 WHERE event_id = $2 AND created_at >= now() - ($3 * INTERVAL '1 minute') \
                 GROUP BY 1 ORDER BY 1",
                bucket_secs,
                event_id,
                window_minutes,
            )
            .await?;

        let question_map = self
            .bucketed(
                "SELECT (FLOOR(EXTRACT(EPOCH FROM created_at) / $1) * $1)::BIGINT AS bucket_epoch, \
                        COUNT(*)::BIGINT AS total \
                 FROM questions \
                 WHERE event_id = $2 AND created_at >= now() - ($3 * INTERVAL '1 minute') \
                 GROUP BY 1 ORDER BY 1",
                bucket_secs,
                event_id,
                window_minutes,
            )
            .await?;

        let retention_map = self
            .bucketed(
                "SELECT (FLOOR(EXTRACT(EPOCH FROM sa.last_ping) / $1) * $1)::BIGINT AS bucket_epoch, \
                        FLOOR(AVG(sa.total_minutes))::BIGINT AS total \
                 FROM session_analytics sa \
                 JOIN users u ON u.id = sa.user_id \
                 WHERE sa.event_id = $2 AND u.role = 'viewer' \
                   AND sa.last_ping >= now() - ($3 * INTERVAL '1 minute') \
                   AND u.id NOT IN (SELECT user_id FROM event_staff WHERE event_id = $2) \
                 GROUP BY 1 ORDER BY 1",
                bucket_secs,
                event_id,
                window_minutes,
            )
            .await?;

        let status_rows = self.questions.status_counts(event_id).await?;
        let status_counts: HashMap<String, i64> = status_rows.into_iter().collect();
        let question_status = TimeSeries {
            labels: QUESTION_STATUS_LABELS.iter().map(|s| s.to_string()).collect(),
            series: QUESTION_STATUS_LABELS
                .iter()
                .map(|label| status_counts.get(*label).copied().unwrap_or(0))
                .collect(),
        };

        Ok(ReportsCharts {
            active_participants: TimeSeries {
                labels: labels.clone(),
                series: fill_series(&buckets, &active_map),
            },
            engagement: EngagementSeries {
                labels: labels.clone(),
                chat: fill_series(&buckets, &chat_map),
                questions: fill_series(&buckets, &question_map),
            },
            question_status,
            retention: TimeSeries {
                labels,
                series: fill_series(&buckets, &retention_map),
            },
        })
    }

    async fn bucketed(
        &self,
        sql: &str,
        bucket_secs: i64,
        event_id: EventId,
        window_minutes: i64,
    ) -> Result<HashMap<i64, i64>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(sql)
            .bind(bucket_secs)
            .bind(event_id.as_i64())
            .bind(window_minutes)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}

fn round_down_to_interval(at: DateTime<Utc>, interval_minutes: i64) -> i64 {
    let interval_secs = interval_minutes.max(1) * 60;
    (at.timestamp() / interval_secs) * interval_secs
}

/// Bucket epochs between start and end (inclusive), with display labels in
/// the target timezone. Windows longer than a day include the date.
fn build_time_labels(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval_minutes: i64,
    tz_name: Option<&str>,
) -> (Vec<String>, Vec<i64>) {
    let tz = target_timezone(tz_name);
    let interval_secs = interval_minutes.max(1) * 60;

    let mut cursor = round_down_to_interval(start, interval_minutes);
    let end_rounded = round_down_to_interval(end, interval_minutes);

    let include_date = end_rounded.saturating_sub(cursor) > 24 * 3600;
    let format = if include_date { "%m-%d %H:%M" } else { "%H:%M" };

    let mut labels = Vec::new();
    let mut buckets = Vec::new();
    while cursor <= end_rounded {
        if let Some(at) = DateTime::<Utc>::from_timestamp(cursor, 0) {
            labels.push(at.with_timezone(&tz).format(format).to_string());
            buckets.push(cursor);
        }
        cursor += interval_secs;
    }

    (labels, buckets)
}

fn fill_series(buckets: &[i64], data: &HashMap<i64, i64>) -> Vec<i64> {
    buckets
        .iter()
        .map(|bucket| data.get(bucket).copied().unwrap_or(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn buckets_cover_the_window_inclusively() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 2, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 13, 2, 0).unwrap();
        let (labels, buckets) = build_time_labels(start, end, 5, Some("UTC"));

        // 12:00 through 13:00 inclusive, in 5-minute steps.
        assert_eq!(buckets.len(), 13);
        assert_eq!(labels.first().map(String::as_str), Some("12:00"));
        assert_eq!(labels.last().map(String::as_str), Some("13:00"));
        assert!(buckets.windows(2).all(|w| w[1] - w[0] == 300));
    }

    #[test]
    fn missing_buckets_fill_with_zero() {
        let buckets = vec![0, 300, 600];
        let mut data = HashMap::new();
        data.insert(300, 7);
        assert_eq!(fill_series(&buckets, &data), vec![0, 7, 0]);
    }

    #[test]
    fn rounding_is_stable_within_an_interval() {
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 10).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 1, 12, 4, 59).unwrap();
        assert_eq!(round_down_to_interval(a, 5), round_down_to_interval(b, 5));

        let c = Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap();
        assert_ne!(round_down_to_interval(a, 5), round_down_to_interval(c, 5));
    }
}
