//! User moderation flags and per-event staff authority.
//!
//! `event_staff` is the authoritative source of per-event authority; the
//! `users.role` column is the platform-wide role and per-event viewer
//! accounts carry their event binding on the user row.

use serde::Serialize;
use sqlx::PgPool;

use tribuna_model::{EventId, StaffRole, UserId};

use crate::error::{CoreError, Result};

/// The block switches a moderator can flip on a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFlag {
    ChatBlocked,
    QaBlocked,
    Banned,
}

impl UserFlag {
    fn column(&self) -> &'static str {
        match self {
            UserFlag::ChatBlocked => "chat_blocked",
            UserFlag::QaBlocked => "qa_blocked",
            UserFlag::Banned => "banned",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "chat_blocked" => Some(UserFlag::ChatBlocked),
            "qa_blocked" => Some(UserFlag::QaBlocked),
            "banned" => Some(UserFlag::Banned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, sqlx::FromRow)]
pub struct UserFlags {
    pub chat_blocked: bool,
    pub qa_blocked: bool,
    pub banned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaffMember {
    pub user_id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub event_id: EventId,
    pub role: StaffRole,
}

#[derive(Clone, Debug)]
pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn flags(&self, user_id: UserId) -> Result<Option<UserFlags>> {
        let flags: Option<UserFlags> = sqlx::query_as(
            "SELECT chat_blocked, qa_blocked, banned FROM users WHERE id = $1",
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(flags)
    }

    pub async fn is_chat_blocked(&self, user_id: UserId) -> Result<bool> {
        Ok(self.flags(user_id).await?.is_some_and(|f| f.chat_blocked))
    }

    pub async fn is_qa_blocked(&self, user_id: UserId) -> Result<bool> {
        Ok(self.flags(user_id).await?.is_some_and(|f| f.qa_blocked))
    }

    pub async fn is_banned(&self, user_id: UserId) -> Result<bool> {
        Ok(self.flags(user_id).await?.is_some_and(|f| f.banned))
    }

    pub async fn set_flag(&self, user_id: UserId, flag: UserFlag, value: bool) -> Result<()> {
        // Column name comes from the enum, never from caller input.
        let sql = format!("UPDATE users SET {} = $2 WHERE id = $1", flag.column());
        let result = sqlx::query(&sql)
            .bind(user_id.as_i64())
            .bind(value)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::State("Usuario no encontrado.".to_string()));
        }
        Ok(())
    }

    /// The user's staff role for this event, if any.
    pub async fn event_role(&self, user_id: UserId, event_id: EventId) -> Result<Option<StaffRole>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM event_staff WHERE user_id = $1 AND event_id = $2",
        )
        .bind(user_id.as_i64())
        .bind(event_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(role.as_deref().and_then(|r| r.parse().ok()))
    }

    pub async fn list_staff(&self, event_id: EventId) -> Result<Vec<StaffMember>> {
        let rows: Vec<(i64, String, Option<String>, String)> = sqlx::query_as(
            "SELECT es.user_id, u.name, u.email, es.role \
             FROM event_staff es \
             JOIN users u ON u.id = es.user_id \
             WHERE es.event_id = $1 \
             ORDER BY es.role, u.name ASC",
        )
        .bind(event_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(user_id, name, email, role)| {
                Some(StaffMember {
                    user_id: UserId::new(user_id),
                    name,
                    email,
                    event_id,
                    role: role.parse().ok()?,
                })
            })
            .collect())
    }

    /// Assign a staff role by email, creating a global user if none exists.
    pub async fn upsert_staff(
        &self,
        event_id: EventId,
        email: &str,
        role: StaffRole,
    ) -> Result<StaffMember> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(CoreError::Validation("email requerido".to_string()));
        }

        // Prefer a global account; fall back to promoting an event-scoped one.
        let existing: Option<(i64, String)> = sqlx::query_as(
            "SELECT id, name FROM users WHERE email = $1 AND event_id IS NULL \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let existing = match existing {
            Some(user) => Some(user),
            None => {
                sqlx::query_as(
                    "SELECT id, name FROM users WHERE email = $1 AND event_id = $2 \
                     ORDER BY created_at DESC LIMIT 1",
                )
                .bind(&email)
                .bind(event_id.as_i64())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        let (user_id, name) = match existing {
            Some((id, name)) => (id, name),
            None => {
                let name = email.split('@').next().unwrap_or(&email).to_string();
                let id: i64 = sqlx::query_scalar(
                    "INSERT INTO users (name, email, role, event_id) \
                     VALUES ($1, $2, 'viewer', NULL) RETURNING id",
                )
                .bind(&name)
                .bind(&email)
                .fetch_one(&self.pool)
                .await?;
                (id, name)
            }
        };

        sqlx::query(
            "INSERT INTO event_staff (user_id, event_id, role) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, event_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(user_id)
        .bind(event_id.as_i64())
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;

        Ok(StaffMember {
            user_id: UserId::new(user_id),
            name,
            email: Some(email),
            event_id,
            role,
        })
    }

    pub async fn remove_staff(&self, user_id: UserId, event_id: EventId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM event_staff WHERE user_id = $1 AND event_id = $2")
            .bind(user_id.as_i64())
            .bind(event_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
