//! Q&A pipeline: pending → approved → read, with reject (delete) and
//! return-to-moderator (approved → pending).
//!
//! Every transition is a single guarded UPDATE/DELETE with RETURNING, so a
//! question that is not in the required state leaves the store untouched and
//! surfaces a state error instead.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tribuna_model::{
    EventId, QuestionBoards, QuestionId, QuestionRecord, QuestionStatus, QuestionView, UserId,
};

use crate::clock::{format_local, now_hhmm};
use crate::error::{CoreError, Result};

#[derive(Clone, Debug)]
pub struct QuestionService {
    pool: PgPool,
}

impl QuestionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new pending question. A manual author name (questions relayed
    /// from an external source by the moderator) overrides the account's
    /// display name on every envelope from then on.
    pub async fn add(
        &self,
        user_id: UserId,
        display_name: &str,
        text: &str,
        event_id: Option<EventId>,
        manual_user_name: Option<&str>,
        tz_name: Option<&str>,
    ) -> Result<QuestionView> {
        let author = manual_user_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(display_name);

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO questions (user_id, user_name, question_text, status, event_id) \
             VALUES ($1, $2, $3, 'pending', $4) \
             RETURNING id",
        )
        .bind(user_id.as_i64())
        .bind(author)
        .bind(text)
        .bind(event_id.map(|id| id.as_i64()))
        .fetch_one(&self.pool)
        .await?;

        Ok(QuestionView {
            id: QuestionId::new(id),
            user: author.to_string(),
            question: text.to_string(),
            timestamp: now_hhmm(tz_name),
        })
    }

    /// Moderator approval. Re-approving an approved question is an
    /// idempotent update; approving a read question is a state error.
    pub async fn approve(&self, id: QuestionId, tz_name: Option<&str>) -> Result<QuestionView> {
        self.transition(
            id,
            "UPDATE questions SET status = 'approved' \
             WHERE id = $1 AND status IN ('pending', 'approved') \
             RETURNING user_name, question_text",
            tz_name,
        )
        .await
    }

    /// Moderator rejection deletes the row outright; rejected questions never
    /// reappear in any listing.
    pub async fn reject(&self, id: QuestionId) -> Result<()> {
        let result = sqlx::query("DELETE FROM questions WHERE id = $1 AND status = 'pending'")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::State(
                "La pregunta no está disponible.".to_string(),
            ));
        }
        Ok(())
    }

    /// Speaker marks an approved question as read on air.
    pub async fn mark_read(&self, id: QuestionId, tz_name: Option<&str>) -> Result<QuestionView> {
        self.transition(
            id,
            "UPDATE questions SET status = 'read' \
             WHERE id = $1 AND status IN ('approved', 'read') \
             RETURNING user_name, question_text",
            tz_name,
        )
        .await
    }

    /// Speaker sends an approved question back to the moderator queue.
    pub async fn return_to_pending(
        &self,
        id: QuestionId,
        tz_name: Option<&str>,
    ) -> Result<QuestionView> {
        self.transition(
            id,
            "UPDATE questions SET status = 'pending' \
             WHERE id = $1 AND status = 'approved' \
             RETURNING user_name, question_text",
            tz_name,
        )
        .await
    }

    async fn transition(
        &self,
        id: QuestionId,
        sql: &str,
        tz_name: Option<&str>,
    ) -> Result<QuestionView> {
        let row: Option<(String, String)> = sqlx::query_as(sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        let (user_name, question_text) = row.ok_or_else(|| {
            CoreError::State("La pregunta no está disponible.".to_string())
        })?;

        Ok(QuestionView {
            id,
            user: user_name,
            question: question_text,
            timestamp: now_hhmm(tz_name),
        })
    }

    pub async fn list(
        &self,
        event_id: EventId,
        status: Option<QuestionStatus>,
        limit: i64,
    ) -> Result<Vec<QuestionRecord>> {
        let rows: Vec<QuestionRow> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT id, event_id, user_id, user_name, question_text, status, created_at \
                     FROM questions WHERE event_id = $1 AND status = $2 \
                     ORDER BY id DESC LIMIT $3",
                )
                .bind(event_id.as_i64())
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, event_id, user_id, user_name, question_text, status, created_at \
                     FROM questions WHERE event_id = $1 \
                     ORDER BY id DESC LIMIT $2",
                )
                .bind(event_id.as_i64())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(QuestionRow::into_record).collect()
    }

    /// The moderator/speaker board: recent questions grouped by state.
    pub async fn boards(
        &self,
        event_id: EventId,
        limit: i64,
        tz_name: Option<&str>,
    ) -> Result<QuestionBoards> {
        let mut boards = QuestionBoards::default();
        for (status, bucket) in [
            (QuestionStatus::Pending, &mut boards.pending),
            (QuestionStatus::Approved, &mut boards.approved),
            (QuestionStatus::Read, &mut boards.read),
        ] {
            let rows: Vec<QuestionRow> = sqlx::query_as(
                "SELECT id, event_id, user_id, user_name, question_text, status, created_at \
                 FROM questions WHERE event_id = $1 AND status = $2 \
                 ORDER BY created_at DESC LIMIT $3",
            )
            .bind(event_id.as_i64())
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            *bucket = rows
                .into_iter()
                .map(|row| QuestionView {
                    id: QuestionId::new(row.id),
                    user: row.user_name,
                    question: row.question_text,
                    timestamp: format_local(row.created_at, tz_name),
                })
                .collect();
        }
        Ok(boards)
    }

    /// Counts grouped by state, for the reports charts. Rejected rows are
    /// deleted, so that bucket stays at zero by construction.
    pub async fn status_counts(&self, event_id: EventId) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*)::BIGINT FROM questions WHERE event_id = $1 GROUP BY status",
        )
        .bind(event_id.as_i64())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    id: i64,
    event_id: Option<i64>,
    user_id: Option<i64>,
    user_name: String,
    question_text: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl QuestionRow {
    fn into_record(self) -> Result<QuestionRecord> {
        let status = match self.status.as_str() {
            "pending" => QuestionStatus::Pending,
            "approved" => QuestionStatus::Approved,
            "read" => QuestionStatus::Read,
            other => {
                return Err(CoreError::State(format!("unknown question status: {other}")));
            }
        };
        Ok(QuestionRecord {
            id: QuestionId::new(self.id),
            event_id: self.event_id.map(EventId::new),
            user_id: self.user_id.map(UserId::new),
            user_name: self.user_name,
            question_text: self.question_text,
            status,
            created_at: self.created_at,
        })
    }
}
