//! Durable append log — SQLite table of every envelope ever produced.
//!
//! Schema:
//! ```sql
//! conversation_log(id INTEGER PK AUTOINCREMENT, session_id TEXT, role TEXT,
//!                  content TEXT, has_multimodal_content BOOLEAN, timestamp TEXT)
//! ```
//!
//! Text-only content is stored verbatim. Anything else is stored as the JSON
//! form of [`Content`] with `has_multimodal_content = 1`. Ordering within a
//! session is the row id, never the timestamp.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::types::{Content, MessageEnvelope, Role};

// ─────────────────────────────────────────────
// Rows and decoding
// ─────────────────────────────────────────────

/// A raw row as read from the log.
#[derive(Clone, Debug)]
pub struct StoredRow {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub has_multimodal_content: bool,
    /// Raw stored text; parsed leniently by [`decode_row`].
    pub timestamp: Option<String>,
}

/// How faithfully a row was restored.
#[derive(Clone, Debug, PartialEq)]
pub enum Fidelity {
    Exact,
    /// The row could not be decoded and was restored as plain text.
    Degraded { reason: String },
}

/// Result of decoding a [`StoredRow`]. Decoding never fails.
#[derive(Clone, Debug)]
pub struct Decoded {
    pub envelope: MessageEnvelope,
    pub fidelity: Fidelity,
}

impl Decoded {
    pub fn is_degraded(&self) -> bool {
        matches!(self.fidelity, Fidelity::Degraded { .. })
    }
}

/// Encode content for storage, returning `(stored_text, has_multimodal_content)`.
pub fn encode_content(content: &Content) -> Result<(String, bool), serde_json::Error> {
    match content {
        Content::Text(text) => Ok((text.clone(), false)),
        parts @ Content::Parts(_) => Ok((serde_json::to_string(parts)?, true)),
    }
}

/// Parse a stored timestamp: RFC 3339, or SQLite's `YYYY-MM-DD HH:MM:SS[.f]` as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Turn a stored row back into an envelope.
///
/// Corrupt multimodal rows, unknown roles and unreadable timestamps degrade
/// instead of failing the caller's hydration.
pub fn decode_row(row: StoredRow) -> Decoded {
    let mut problems = Vec::new();

    let role = Role::parse(&row.role).unwrap_or_else(|| {
        problems.push(format!("unknown role '{}'", row.role));
        Role::User
    });

    let content = if row.has_multimodal_content {
        match serde_json::from_str::<Content>(&row.content) {
            Ok(content) => content,
            Err(e) => {
                problems.push(format!("undecodable multimodal content: {e}"));
                Content::Text(row.content.clone())
            }
        }
    } else {
        Content::Text(row.content.clone())
    };

    let created_at = match row.timestamp.as_deref().and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            problems.push(format!("unreadable timestamp {:?}", row.timestamp));
            Utc::now()
        }
    };

    let fidelity = if problems.is_empty() {
        Fidelity::Exact
    } else {
        Fidelity::Degraded {
            reason: problems.join("; "),
        }
    };

    Decoded {
        envelope: MessageEnvelope {
            role,
            content,
            session_id: row.session_id,
            created_at,
        },
        fidelity,
    }
}

// ─────────────────────────────────────────────
// DurableLog
// ─────────────────────────────────────────────

/// Append/read/delete access to the conversation log.
///
/// Safe to share across sessions; SQLite serializes writers.
#[derive(Clone)]
pub struct DurableLog {
    pool: SqlitePool,
}

impl DurableLog {
    /// Open (or create) the log database at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Open(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open(format!("{}: {e}", path.display())))?;

        let log = Self { pool };
        log.migrate().await?;
        debug!(path = %path.display(), "conversation log opened");
        Ok(log)
    }

    /// An in-memory log (single connection kept alive for the pool's lifetime).
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Open(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open(e.to_string()))?;

        let log = Self { pool };
        log.migrate().await?;
        Ok(log)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                has_multimodal_content BOOLEAN NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversation_log_session ON conversation_log(session_id, id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist one envelope, returning its row id.
    pub async fn append(&self, envelope: &MessageEnvelope) -> StoreResult<i64> {
        let (content, multimodal) = encode_content(&envelope.content)?;

        let result = sqlx::query(
            "INSERT INTO conversation_log (session_id, role, content, has_multimodal_content, timestamp) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&envelope.session_id)
        .bind(envelope.role.as_str())
        .bind(content)
        .bind(multimodal)
        .bind(envelope.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// The most recent `limit` rows of a session, oldest first.
    pub async fn recent(&self, session_id: &str, limit: usize) -> StoreResult<Vec<StoredRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, role, content, has_multimodal_content,
                   CAST(timestamp AS TEXT) AS timestamp
            FROM (
                SELECT id, session_id, role, content, has_multimodal_content, timestamp
                FROM conversation_log
                WHERE session_id = ?
                ORDER BY id DESC
                LIMIT ?
            )
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StoredRow {
                    id: row.try_get("id")?,
                    session_id: row.try_get("session_id")?,
                    role: row.try_get("role")?,
                    content: row.try_get("content")?,
                    has_multimodal_content: row.try_get("has_multimodal_content")?,
                    timestamp: row.try_get("timestamp")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    /// Delete every row of a session, returning how many were removed.
    pub async fn clear(&self, session_id: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM conversation_log WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of rows stored for a session.
    pub async fn count(&self, session_id: &str) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversation_log WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) async fn insert_raw(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        multimodal: bool,
    ) -> StoreResult<()> {
        self.insert_raw_at(session_id, role, content, multimodal, &Utc::now().to_rfc3339())
            .await
    }

    #[cfg(test)]
    pub(crate) async fn insert_raw_at(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        multimodal: bool,
        timestamp: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO conversation_log (session_id, role, content, has_multimodal_content, timestamp) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(multimodal)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
