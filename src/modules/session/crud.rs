//! Durable store access for sessions, conversations and turns.
//!
//! Reads go to the reader pool inside a read transaction so the session row,
//! title and turns come from one snapshot. Writes go to the single-connection
//! writer pool.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::config::database::DatabasePool;
use crate::modules::session::error::SessionError;
use crate::modules::session::model::{
    derive_title, format_timestamp, parse_timestamp, Role, SessionSummary, SessionView, Turn,
    TurnInput, DEFAULT_TITLE,
};

struct SessionRow {
    id: String,
    owner_id: Option<String>,
    created_at: String,
    last_active: String,
    version: i64,
}

impl SessionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            created_at: row.try_get("created_at")?,
            last_active: row.try_get("last_active")?,
            version: row.try_get("version")?,
        })
    }
}

struct TurnRow {
    id: String,
    role: String,
    content: String,
    created_at: String,
}

impl TurnRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_turn(self) -> Result<Turn, SessionError> {
        let role: Role = self.role.parse().map_err(SessionError::Corrupt)?;
        Ok(Turn {
            id: self.id,
            role,
            content: self.content,
            created_at: timestamp(&self.created_at)?,
        })
    }
}

fn timestamp(s: &str) -> Result<DateTime<Utc>, SessionError> {
    parse_timestamp(s).map_err(|e| SessionError::Corrupt(format!("invalid datetime {s:?}: {e}")))
}

const ACTIVE_SESSION_SQL: &str = "SELECT id, owner_id, created_at, last_active, version FROM sessions \
     WHERE id = ? AND is_active = 1 AND (? IS NULL OR owner_id = ?)";

pub struct SessionCrud {
    pool: DatabasePool,
}

impl SessionCrud {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub async fn create(
        &self,
        id: &str,
        owner_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let ts = format_timestamp(&now);
        sqlx::query(
            "INSERT INTO sessions (id, owner_id, created_at, last_active, is_active) VALUES (?, ?, ?, ?, 1)",
        )
        .bind(id)
        .bind(owner_id)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool.writer)
        .await?;

        Ok(())
    }

    /// Assembles the view of an active session, scoped to `owner_id` when given.
    pub async fn find_view(
        &self,
        id: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<SessionView>, SessionError> {
        let mut tx = self.pool.reader.begin().await?;

        let row = sqlx::query(ACTIVE_SESSION_SQL)
            .bind(id)
            .bind(owner_id)
            .bind(owner_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let session = SessionRow::from_row(&row)?;

        let conversation = sqlx::query("SELECT id, title FROM conversations WHERE session_id = ?")
            .bind(&session.id)
            .fetch_optional(&mut *tx)
            .await?;

        let (title, turns) = match conversation {
            Some(conv) => {
                let conversation_id: String = conv.try_get("id")?;
                let title: String = conv.try_get("title")?;

                let rows = sqlx::query(
                    "SELECT id, role, content, created_at FROM turns \
                     WHERE conversation_id = ? AND session_id = ? ORDER BY position ASC",
                )
                .bind(&conversation_id)
                .bind(&session.id)
                .fetch_all(&mut *tx)
                .await?;

                let mut turns = Vec::with_capacity(rows.len());
                for row in &rows {
                    turns.push(TurnRow::from_row(row)?.into_turn()?);
                }
                (title, turns)
            }
            None => (DEFAULT_TITLE.to_string(), Vec::new()),
        };

        tx.commit().await?;

        Ok(Some(SessionView {
            created_at: timestamp(&session.created_at)?,
            last_active: timestamp(&session.last_active)?,
            session_id: session.id,
            owner_id: session.owner_id,
            title,
            turns,
            version: session.version,
        }))
    }

    /// Replaces every turn of the session's conversation in one transaction
    /// and returns the new version.
    ///
    /// Returns `None`, with nothing written, when no matching active session
    /// exists. When `expected_version` is given and the stored version has
    /// moved on, fails with `Conflict` and writes nothing.
    pub async fn replace_turns(
        &self,
        id: &str,
        owner_id: Option<&str>,
        turns: &[TurnInput],
        expected_version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, SessionError> {
        let ts = format_timestamp(&now);
        let mut tx = self.pool.writer.begin().await?;

        let row = sqlx::query(ACTIVE_SESSION_SQL)
            .bind(id)
            .bind(owner_id)
            .bind(owner_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let session = SessionRow::from_row(&row)?;
        let base_version = expected_version.unwrap_or(session.version);

        let bumped = sqlx::query(
            "UPDATE sessions SET last_active = ?, version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(&ts)
        .bind(&session.id)
        .bind(base_version)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            return Err(SessionError::Conflict(session.id));
        }
        let version = base_version + 1;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM conversations WHERE session_id = ?")
                .bind(&session.id)
                .fetch_optional(&mut *tx)
                .await?;

        let conversation_id = match existing {
            Some(conversation_id) => conversation_id,
            // An empty list has nothing to store; the conversation stays unmaterialized.
            None if turns.is_empty() => {
                tx.commit().await?;
                return Ok(Some(version));
            }
            None => {
                let conversation_id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO conversations (id, owner_id, session_id, title, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&conversation_id)
                .bind(&session.owner_id)
                .bind(&session.id)
                .bind(DEFAULT_TITLE)
                .bind(&ts)
                .bind(&ts)
                .execute(&mut *tx)
                .await?;
                conversation_id
            }
        };

        sqlx::query("DELETE FROM turns WHERE conversation_id = ?")
            .bind(&conversation_id)
            .execute(&mut *tx)
            .await?;

        for (position, turn) in turns.iter().enumerate() {
            let turn_id = turn
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let created_at = turn
                .created_at
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_else(|| ts.clone());

            sqlx::query(
                "INSERT INTO turns (id, conversation_id, session_id, position, role, content, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(turn_id)
            .bind(&conversation_id)
            .bind(&session.id)
            .bind(position as i64)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        match derive_title(turns) {
            Some(title) => {
                sqlx::query("UPDATE conversations SET title = ?, updated_at = ? WHERE id = ?")
                    .bind(title)
                    .bind(&ts)
                    .bind(&conversation_id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
                    .bind(&ts)
                    .bind(&conversation_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(Some(version))
    }

    pub async fn soft_delete(&self, id: &str, owner_id: &str) -> Result<bool, SessionError> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = 0 WHERE id = ? AND owner_id = ? AND is_active = 1",
        )
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool.writer)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active sessions, most recently active first, each with its title and
    /// turn count.
    pub async fn list_active(
        &self,
        owner_id: Option<&str>,
    ) -> Result<Vec<SessionSummary>, SessionError> {
        let rows = sqlx::query(
            r#"SELECT s.id, s.owner_id, s.created_at, s.last_active, s.version, c.title,
                      (SELECT COUNT(*) FROM turns t WHERE t.session_id = s.id) AS message_count
               FROM sessions s
               LEFT JOIN conversations c ON c.session_id = s.id
               WHERE s.is_active = 1 AND (? IS NULL OR s.owner_id = ?)
               ORDER BY s.last_active DESC, s.created_at DESC, s.id ASC"#,
        )
        .bind(owner_id)
        .bind(owner_id)
        .fetch_all(&self.pool.reader)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let session = SessionRow::from_row(row)?;
            let title: Option<String> = row.try_get("title")?;
            let message_count: i64 = row.try_get("message_count")?;

            sessions.push(SessionSummary {
                created_at: timestamp(&session.created_at)?,
                last_active: timestamp(&session.last_active)?,
                session_id: session.id,
                owner_id: session.owner_id,
                title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                message_count: message_count as u64,
            });
        }

        Ok(sessions)
    }

    /// Soft-deletes every active session idle since before `cutoff`, returning
    /// their ids.
    pub async fn deactivate_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, SessionError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "UPDATE sessions SET is_active = 0 WHERE is_active = 1 AND last_active < ? RETURNING id",
        )
        .bind(format_timestamp(&cutoff))
        .fetch_all(&self.pool.writer)
        .await?;

        Ok(ids)
    }
}
