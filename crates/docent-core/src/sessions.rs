//! Document sessions: ingestion and expiry.
//!
//! A session is one uploaded document owned by the client address that
//! uploaded it. Ingestion chunks the extracted text, embeds every chunk,
//! and only then writes the session and its chunks in one store call, so a
//! provider failure leaves nothing behind. Sessions live for a fixed
//! retention period; [`SessionManager::cleanup_expired`] is the only
//! deletion path apart from the administrative [`SessionManager::purge_all`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::embedding::{embed_batched, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{DocumentChunk, DocumentSession};
use crate::store::Store;

/// Session manager tuning, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Time from creation to expiry. Must be positive.
    pub retention: Duration,
    /// Texts per embedding request.
    pub embed_batch_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retention: Duration::hours(24),
            embed_batch_size: 64,
        }
    }
}

pub struct SessionManager<S: ?Sized> {
    store: Arc<S>,
    provider: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    settings: SessionSettings,
}

impl<S: Store + ?Sized> SessionManager<S> {
    /// # Errors
    ///
    /// [`Error::Validation`] if the retention period is not positive.
    pub fn new(
        store: Arc<S>,
        provider: Arc<dyn EmbeddingProvider>,
        chunker: Chunker,
        settings: SessionSettings,
    ) -> Result<Self> {
        if settings.retention <= Duration::zero() {
            return Err(Error::Validation("document retention must be positive".into()));
        }
        Ok(Self {
            store,
            provider,
            chunker,
            settings,
        })
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Chunk `text` and store it as a new session.
    pub async fn ingest_text(
        &self,
        owner_address: &str,
        filename: &str,
        text: &str,
    ) -> Result<DocumentSession> {
        self.ingest_text_at(owner_address, filename, text, Utc::now())
            .await
    }

    pub async fn ingest_text_at(
        &self,
        owner_address: &str,
        filename: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<DocumentSession> {
        let chunks = self.chunker.chunk(text);
        self.create_session_at(owner_address, filename, chunks, now)
            .await
    }

    pub async fn create_session(
        &self,
        owner_address: &str,
        filename: &str,
        chunks: Vec<String>,
    ) -> Result<DocumentSession> {
        self.create_session_at(owner_address, filename, chunks, Utc::now())
            .await
    }

    /// Embed `chunks` and store them under a new session created at `now`.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for an empty chunk list or blank owner.
    /// - [`Error::Provider`] / [`Error::ProviderTimeout`] from embedding;
    ///   nothing is written in that case.
    /// - [`Error::Storage`] from the store.
    pub async fn create_session_at(
        &self,
        owner_address: &str,
        filename: &str,
        chunks: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<DocumentSession> {
        if owner_address.trim().is_empty() {
            return Err(Error::Validation("owner address is required".into()));
        }
        if chunks.is_empty() {
            return Err(Error::Validation(format!(
                "document '{}' produced no chunks",
                filename
            )));
        }

        let vectors = embed_batched(
            self.provider.as_ref(),
            &chunks,
            self.settings.embed_batch_size,
        )
        .await?;

        let session = DocumentSession {
            id: Uuid::new_v4().to_string(),
            owner_address: owner_address.to_string(),
            filename: filename.to_string(),
            created_at: now,
            expires_at: now + self.settings.retention,
            chunk_count: chunks.len(),
        };

        let records: Vec<DocumentChunk> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (text, embedding))| DocumentChunk {
                document_id: session.id.clone(),
                chunk_index,
                text,
                embedding,
            })
            .collect();

        self.store.insert_session(&session, &records).await?;
        Ok(session)
    }

    /// Session metadata by id. Sessions past their expiry are still
    /// returned until cleanup removes them.
    pub async fn get_session(&self, id: &str) -> Result<DocumentSession> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document session {}", id)))
    }

    /// The newest unexpired session owned by `owner_address`, if any.
    pub async fn active_session_for(
        &self,
        owner_address: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DocumentSession>> {
        let sessions = self.store.sessions_for_owner(owner_address).await?;
        Ok(sessions.into_iter().find(|s| !s.is_expired(now)))
    }

    /// Remove every session with `expires_at <= now` and its chunks.
    /// Idempotent.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.store.delete_expired_sessions(now).await
    }

    pub async fn cleanup_now(&self) -> Result<u64> {
        self.cleanup_expired(Utc::now()).await
    }

    /// Administrative cleanup: remove every session regardless of expiry.
    pub async fn purge_all(&self) -> Result<u64> {
        self.store.delete_all_sessions().await
    }
}
