//! Poll engine: draft → published → closed lifecycle in the durable store,
//! with the live tally held in the hot store while a poll runs.
//!
//! At most one poll is live per event; the live descriptor is installed with
//! SET NX so a second launch fails instead of clobbering the first. Voting is
//! a single server-side script over the voters set and counts hash, so the
//! same user racing themselves can never double-count.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;

use tribuna_model::{
    EventId, FinalResults, LivePoll, PollId, PollRecord, PollStatus, PollTally, StoredOptionResult,
    UserId,
};

use crate::error::{CoreError, Result};
use crate::hot::{HotStore, keys};

/// A closed poll's stored results with option labels, as served to staff.
#[derive(Debug, Clone, Serialize)]
pub struct StoredPollResults {
    pub poll_id: PollId,
    pub question: String,
    pub results: Vec<StoredOptionResult>,
    pub total_votes: u64,
}

#[derive(Clone, Debug)]
pub struct PollService {
    pool: PgPool,
    hot: HotStore,
}

impl PollService {
    pub fn new(pool: PgPool, hot: HotStore) -> Self {
        Self { pool, hot }
    }

    /// Create a pre-poll in draft. No live state is touched.
    pub async fn create(
        &self,
        event_id: EventId,
        question: &str,
        options: &[String],
    ) -> Result<PollId> {
        validate_options(options)?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO polls (event_id, question, options, status) \
             VALUES ($1, $2, $3, 'draft') RETURNING id",
        )
        .bind(event_id.as_i64())
        .bind(question)
        .bind(serde_json::to_value(options)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(PollId::new(id))
    }

    pub async fn update_content(
        &self,
        poll_id: PollId,
        question: &str,
        options: &[String],
    ) -> Result<()> {
        validate_options(options)?;

        let result = sqlx::query(
            "UPDATE polls SET question = $2, options = $3 WHERE id = $1 AND status <> 'closed'",
        )
        .bind(poll_id.as_i64())
        .bind(question)
        .bind(serde_json::to_value(options)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::State("Poll not editable".to_string()));
        }
        Ok(())
    }

    /// Toggle a poll between draft and published. Closing goes through
    /// [`PollService::close`], which also snapshots the tally.
    pub async fn update_status(&self, poll_id: PollId, status: PollStatus) -> Result<()> {
        if status == PollStatus::Closed {
            return Err(CoreError::State(
                "Polls are closed through the live close path".to_string(),
            ));
        }

        let result = sqlx::query("UPDATE polls SET status = $2 WHERE id = $1 AND status <> 'closed'")
            .bind(poll_id.as_i64())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::State("Poll not editable".to_string()));
        }
        Ok(())
    }

    pub async fn list(&self, event_id: EventId) -> Result<Vec<PollRecord>> {
        let rows: Vec<PollRow> = sqlx::query_as(
            "SELECT id, event_id, question, options, status, close_at, created_at \
             FROM polls WHERE event_id = $1 ORDER BY created_at DESC",
        )
        .bind(event_id.as_i64())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PollRow::into_record).collect()
    }

    pub async fn get(&self, poll_id: PollId) -> Result<Option<PollRecord>> {
        let row: Option<PollRow> = sqlx::query_as(
            "SELECT id, event_id, question, options, status, close_at, created_at \
             FROM polls WHERE id = $1",
        )
        .bind(poll_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PollRow::into_record).transpose()
    }

    /// Launch a pre-created, published poll. Fails if another poll is already
    /// live for the event.
    pub async fn launch(
        &self,
        event_id: EventId,
        poll_id: PollId,
        duration_minutes: Option<i64>,
    ) -> Result<LivePoll> {
        let row: Option<PollRow> = sqlx::query_as(
            "SELECT id, event_id, question, options, status, close_at, created_at \
             FROM polls WHERE id = $1 AND event_id = $2",
        )
        .bind(poll_id.as_i64())
        .bind(event_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let record = row
            .map(PollRow::into_record)
            .transpose()?
            .ok_or_else(|| CoreError::State("Poll not available".to_string()))?;

        if record.status != PollStatus::Published {
            return Err(CoreError::State(
                "Poll not available (must be published)".to_string(),
            ));
        }

        self.install_live(event_id, poll_id, &record.question, &record.options, duration_minutes)
            .await
    }

    /// Legacy ad-hoc start: insert the poll and launch it in one step.
    pub async fn start(
        &self,
        event_id: EventId,
        question: &str,
        options: &[String],
        duration_minutes: Option<i64>,
    ) -> Result<LivePoll> {
        validate_options(options)?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO polls (event_id, question, options, status) \
             VALUES ($1, $2, $3, 'published') RETURNING id",
        )
        .bind(event_id.as_i64())
        .bind(question)
        .bind(serde_json::to_value(options)?)
        .fetch_one(&self.pool)
        .await?;

        self.install_live(event_id, PollId::new(id), question, options, duration_minutes)
            .await
    }

    async fn install_live(
        &self,
        event_id: EventId,
        poll_id: PollId,
        question: &str,
        options: &[String],
        duration_minutes: Option<i64>,
    ) -> Result<LivePoll> {
        let close_at = duration_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Utc::now() + Duration::minutes(minutes));

        if let Some(close_at) = close_at {
            sqlx::query("UPDATE polls SET close_at = $2 WHERE id = $1")
                .bind(poll_id.as_i64())
                .bind(close_at)
                .execute(&self.pool)
                .await?;
        }

        let live = LivePoll {
            poll_id,
            question: question.to_string(),
            options: options.to_vec(),
            close_at,
            created_at: Utc::now(),
            results: None,
            total_votes: None,
        };

        let installed = self
            .hot
            .set_json_nx(&keys::poll_live(event_id), &live)
            .await?;
        if !installed {
            return Err(CoreError::State(
                "Ya hay una encuesta activa para este evento.".to_string(),
            ));
        }

        self.hot
            .init_counts(&keys::poll_counts(poll_id), options.len())
            .await?;

        Ok(live)
    }

    /// The raw live descriptor, even if its close time has passed. The
    /// auto-close timer uses this to verify it still owns the live poll.
    pub async fn live_raw(&self, event_id: EventId) -> Result<Option<LivePoll>> {
        self.hot.get_json(&keys::poll_live(event_id)).await
    }

    /// The current live poll with its running tally attached, or None. A
    /// descriptor whose close time has already passed counts as absent.
    pub async fn live(&self, event_id: EventId) -> Result<Option<LivePoll>> {
        let Some(mut live) = self
            .hot
            .get_json::<LivePoll>(&keys::poll_live(event_id))
            .await?
        else {
            return Ok(None);
        };

        if let Some(close_at) = live.close_at
            && Utc::now() > close_at
        {
            return Ok(None);
        }

        let counts = self.hot.counts(&keys::poll_counts(live.poll_id)).await?;
        live.total_votes = Some(counts.values().sum());
        live.results = Some(counts);
        Ok(Some(live))
    }

    /// Cast a vote. Returns the updated tally, or `None` when this user had
    /// already voted (the duplicate is dropped without a broadcast).
    pub async fn vote(
        &self,
        event_id: EventId,
        user_id: UserId,
        option_index: usize,
    ) -> Result<Option<PollTally>> {
        let Some(live) = self
            .hot
            .get_json::<LivePoll>(&keys::poll_live(event_id))
            .await?
        else {
            return Err(CoreError::State(
                "No hay una encuesta activa.".to_string(),
            ));
        };

        if option_index >= live.options.len() {
            return Err(CoreError::Validation("Opción inválida.".to_string()));
        }

        // Boundary is inclusive: a vote at exactly close_at still counts.
        if let Some(close_at) = live.close_at
            && Utc::now() > close_at
        {
            return Err(CoreError::State("Encuesta cerrada.".to_string()));
        }

        let counted = self
            .hot
            .cast_vote(
                &keys::poll_voted(live.poll_id),
                &keys::poll_counts(live.poll_id),
                &user_id.to_string(),
                option_index,
            )
            .await?;

        if !counted {
            return Ok(None);
        }

        let counts = self.hot.counts(&keys::poll_counts(live.poll_id)).await?;
        Ok(Some(PollTally {
            poll_id: live.poll_id,
            total_votes: counts.values().sum(),
            results: counts,
        }))
    }

    /// Best-effort audit row for one accepted vote; duplicate-key conflicts
    /// are ignored so the log stays at-most-once per voter.
    pub async fn record_vote_audit(
        &self,
        poll_id: PollId,
        event_id: EventId,
        user_id: UserId,
        option_index: usize,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO poll_votes (poll_id, event_id, user_id, option_index) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (poll_id, user_id) DO NOTHING",
        )
        .bind(poll_id.as_i64())
        .bind(event_id.as_i64())
        .bind(user_id.as_i64())
        .bind(option_index as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close the live poll: snapshot counts durably, mark the row closed,
    /// tear down the hot keys. Returns `None` when no poll was live — which
    /// is how a stale auto-close timer finds out it lost the race.
    pub async fn close(&self, event_id: EventId) -> Result<Option<FinalResults>> {
        // GETDEL makes whoever grabs the descriptor the single closer.
        let Some(live) = self
            .hot
            .getdel_json::<LivePoll>(&keys::poll_live(event_id))
            .await?
        else {
            return Ok(None);
        };

        let counts_key = keys::poll_counts(live.poll_id);
        let results = self.hot.counts(&counts_key).await?;
        let total_votes: u64 = results.values().sum();

        for (option_index, votes) in &results {
            sqlx::query(
                "INSERT INTO poll_results (poll_id, option_index, votes) VALUES ($1, $2, $3)",
            )
            .bind(live.poll_id.as_i64())
            .bind(*option_index as i32)
            .bind(*votes as i64)
            .execute(&self.pool)
            .await?;
        }

        sqlx::query("UPDATE polls SET status = 'closed' WHERE id = $1")
            .bind(live.poll_id.as_i64())
            .execute(&self.pool)
            .await?;

        if let Err(err) = self.hot.delete(&counts_key).await {
            warn!(error = %err, "failed to delete poll counts");
        }
        if let Err(err) = self.hot.delete(&keys::poll_voted(live.poll_id)).await {
            warn!(error = %err, "failed to delete poll voters");
        }

        Ok(Some(FinalResults {
            poll_id: live.poll_id,
            question: live.question,
            options: live.options,
            results,
            total_votes,
        }))
    }

    /// Stored results of a closed poll, labelled with its option texts.
    pub async fn stored_results(&self, poll_id: PollId) -> Result<Option<StoredPollResults>> {
        let row: Option<(String, serde_json::Value)> =
            sqlx::query_as("SELECT question, options FROM polls WHERE id = $1")
                .bind(poll_id.as_i64())
                .fetch_optional(&self.pool)
                .await?;

        let Some((question, options_json)) = row else {
            return Ok(None);
        };
        let options: Vec<String> = serde_json::from_value(options_json)?;

        let rows: Vec<(i32, i64)> = sqlx::query_as(
            "SELECT option_index, votes FROM poll_results \
             WHERE poll_id = $1 ORDER BY option_index ASC",
        )
        .bind(poll_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        let total_votes: u64 = rows.iter().map(|(_, votes)| *votes as u64).sum();
        let results = rows
            .into_iter()
            .map(|(index, votes)| {
                let option_index = index as usize;
                let option = options
                    .get(option_index)
                    .cloned()
                    .unwrap_or_else(|| format!("Opción {}", option_index + 1));
                StoredOptionResult {
                    option,
                    votes: votes as u64,
                    option_index,
                }
            })
            .collect();

        Ok(Some(StoredPollResults {
            poll_id,
            question,
            results,
            total_votes,
        }))
    }
}

fn validate_options(options: &[String]) -> Result<()> {
    let filled = options.iter().filter(|opt| !opt.trim().is_empty()).count();
    if filled < 2 || filled != options.len() {
        return Err(CoreError::Validation("Invalid poll data".to_string()));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct PollRow {
    id: i64,
    event_id: i64,
    question: String,
    options: serde_json::Value,
    status: String,
    close_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl PollRow {
    fn into_record(self) -> Result<PollRecord> {
        let status = match self.status.as_str() {
            "draft" => PollStatus::Draft,
            "published" => PollStatus::Published,
            "closed" => PollStatus::Closed,
            other => return Err(CoreError::State(format!("unknown poll status: {other}"))),
        };
        Ok(PollRecord {
            id: PollId::new(self.id),
            event_id: EventId::new(self.event_id),
            question: self.question,
            options: serde_json::from_value(self.options)?,
            status,
            close_at: self.close_at,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_need_at_least_two_non_empty_entries() {
        let ok = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(validate_options(&ok).is_ok());

        assert!(validate_options(&["a".to_string()]).is_err());
        assert!(validate_options(&["a".to_string(), "  ".to_string()]).is_err());
        assert!(validate_options(&[]).is_err());
    }
}
