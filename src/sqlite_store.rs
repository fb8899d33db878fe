//! SQLite-backed [`Store`] implementation.
//!
//! Timestamps are stored as Unix milliseconds and embeddings as
//! little-endian `f32` BLOBs. Chunk rows reference their session with
//! `ON DELETE CASCADE`, so deleting a session row removes its chunks in the
//! same statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use docent_core::embedding::{blob_to_vec, vec_to_blob};
use docent_core::models::{ActionType, DocumentChunk, DocumentSession, UsageEvent};
use docent_core::store::{ActionCounts, Store};
use docent_core::{Error, Result};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::storage(anyhow::anyhow!("timestamp out of range: {}", ms)))
}

fn latency_column(ms: Option<u64>) -> Result<Option<i64>> {
    ms.map(|ms| {
        i64::try_from(ms)
            .map_err(|_| Error::Validation(format!("response time out of range: {} ms", ms)))
    })
    .transpose()
}

fn event_from_row(row: &SqliteRow) -> Result<UsageEvent> {
    let action: String = row.try_get("action").map_err(Error::storage)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(Error::storage)?;
    let metadata: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).map_err(Error::storage)?;
    let response_time_ms: Option<i64> = row.try_get("response_time_ms").map_err(Error::storage)?;
    let response_time_ms = response_time_ms
        .map(u64::try_from)
        .transpose()
        .map_err(Error::storage)?;

    Ok(UsageEvent {
        id: row.try_get("id").map_err(Error::storage)?,
        client_address: row.try_get("client_address").map_err(Error::storage)?,
        action: action.parse::<ActionType>().map_err(Error::storage)?,
        timestamp: from_ms(row.try_get("occurred_at_ms").map_err(Error::storage)?)?,
        document_id: row.try_get("document_id").map_err(Error::storage)?,
        response_time_ms,
        metadata,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<DocumentSession> {
    let chunk_count: i64 = row.try_get("chunk_count").map_err(Error::storage)?;
    Ok(DocumentSession {
        id: row.try_get("id").map_err(Error::storage)?,
        owner_address: row.try_get("owner_address").map_err(Error::storage)?,
        filename: row.try_get("filename").map_err(Error::storage)?,
        created_at: from_ms(row.try_get("created_at_ms").map_err(Error::storage)?)?,
        expires_at: from_ms(row.try_get("expires_at_ms").map_err(Error::storage)?)?,
        chunk_count: chunk_count as usize,
    })
}

const SESSION_COLUMNS: &str =
    "id, owner_address, filename, created_at_ms, expires_at_ms, chunk_count";

#[async_trait]
impl Store for SqliteStore {
    async fn append_event(&self, event: &UsageEvent) -> Result<()> {
        let metadata_json = serde_json::to_string(&event.metadata).map_err(Error::storage)?;
        sqlx::query(
            r#"
            INSERT INTO usage_events (id, client_address, action, occurred_at_ms,
                                      document_id, response_time_ms, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.client_address)
        .bind(event.action.as_str())
        .bind(to_ms(event.timestamp))
        .bind(&event.document_id)
        .bind(latency_column(event.response_time_ms)?)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn append_event_within_limit(
        &self,
        event: &UsageEvent,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<bool> {
        let metadata_json = serde_json::to_string(&event.metadata).map_err(Error::storage)?;

        // A single statement runs in its own implicit transaction, so the
        // count and the insert see the same snapshot under SQLite's write lock.
        let done = sqlx::query(
            r#"
            INSERT INTO usage_events (id, client_address, action, occurred_at_ms,
                                      document_id, response_time_ms, metadata_json)
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE (
                SELECT COUNT(*) FROM usage_events
                WHERE client_address = ? AND action = ?
                  AND occurred_at_ms > ? AND occurred_at_ms <= ?
            ) < ?
            "#,
        )
        .bind(&event.id)
        .bind(&event.client_address)
        .bind(event.action.as_str())
        .bind(to_ms(event.timestamp))
        .bind(&event.document_id)
        .bind(latency_column(event.response_time_ms)?)
        .bind(&metadata_json)
        .bind(&event.client_address)
        .bind(event.action.as_str())
        .bind(to_ms(since))
        .bind(to_ms(event.timestamp))
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;

        Ok(done.rows_affected() == 1)
    }

    async fn count_actions(
        &self,
        client_address: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ActionCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN action = 'question' THEN 1 ELSE 0 END), 0) AS questions,
                COALESCE(SUM(CASE WHEN action = 'upload' THEN 1 ELSE 0 END), 0) AS uploads
            FROM usage_events
            WHERE client_address = ? AND occurred_at_ms > ? AND occurred_at_ms <= ?
            "#,
        )
        .bind(client_address)
        .bind(to_ms(since))
        .bind(to_ms(until))
        .fetch_one(&self.pool)
        .await
        .map_err(Error::storage)?;

        let questions: i64 = row.try_get("questions").map_err(Error::storage)?;
        let uploads: i64 = row.try_get("uploads").map_err(Error::storage)?;
        Ok(ActionCounts {
            questions: questions as u32,
            uploads: uploads as u32,
        })
    }

    async fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, client_address, action, occurred_at_ms, document_id,
                   response_time_ms, metadata_json
            FROM usage_events
            WHERE occurred_at_ms >= ? AND occurred_at_ms < ?
            ORDER BY occurred_at_ms ASC, id ASC
            "#,
        )
        .bind(to_ms(start))
        .bind(to_ms(end))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM usage_events WHERE occurred_at_ms < ?")
            .bind(to_ms(cutoff))
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(done.rows_affected())
    }

    async fn insert_session(
        &self,
        session: &DocumentSession,
        chunks: &[DocumentChunk],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        sqlx::query(
            r#"
            INSERT INTO document_sessions (id, owner_address, filename,
                                           created_at_ms, expires_at_ms, chunk_count)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.owner_address)
        .bind(&session.filename)
        .bind(to_ms(session.created_at))
        .bind(to_ms(session.expires_at))
        .bind(session.chunk_count as i64)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunks (document_id, chunk_index, text, embedding)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&session.id)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.text)
            .bind(vec_to_blob(&chunk.embedding))
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
        }

        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<DocumentSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM document_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn sessions_for_owner(&self, owner_address: &str) -> Result<Vec<DocumentSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM document_sessions WHERE owner_address = ? \
             ORDER BY created_at_ms DESC, id ASC",
            SESSION_COLUMNS
        ))
        .bind(owner_address)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        rows.iter().map(session_from_row).collect()
    }

    async fn session_chunks(&self, id: &str) -> Result<Option<Vec<DocumentChunk>>> {
        // One read transaction: the session row and its chunks come from the
        // same snapshot even if a cleanup commits in between.
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM document_sessions WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::storage)?;
        if !exists {
            tx.commit().await.map_err(Error::storage)?;
            return Ok(None);
        }

        let rows = sqlx::query(
            r#"
            SELECT chunk_index, text, embedding FROM document_chunks
            WHERE document_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::storage)?;
        tx.commit().await.map_err(Error::storage)?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk_index: i64 = row.try_get("chunk_index").map_err(Error::storage)?;
            let blob: Vec<u8> = row.try_get("embedding").map_err(Error::storage)?;
            chunks.push(DocumentChunk {
                document_id: id.to_string(),
                chunk_index: chunk_index as usize,
                text: row.try_get("text").map_err(Error::storage)?,
                embedding: blob_to_vec(&blob),
            });
        }
        Ok(Some(chunks))
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM document_sessions WHERE expires_at_ms <= ?")
            .bind(to_ms(now))
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(done.rows_affected())
    }

    async fn delete_all_sessions(&self) -> Result<u64> {
        let done = sqlx::query("DELETE FROM document_sessions")
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(done.rows_affected())
    }
}
