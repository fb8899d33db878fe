//! Application context: one store, one provider, and the components built
//! on them.
//!
//! Created once at start-up from [`Config`] and passed by reference; the
//! pool is closed explicitly with [`AppContext::close`].

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use docent_core::embedding::EmbeddingProvider;
use docent_core::models::{ActionDetails, ActionType, DocumentSession, RateLimitStatus};
use docent_core::quota::RateLimiter;
use docent_core::search::{ScoredPassage, SearchEngine};
use docent_core::sessions::SessionManager;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteStore;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub limiter: RateLimiter<SqliteStore>,
    pub sessions: Arc<SessionManager<SqliteStore>>,
    pub search: SearchEngine<SqliteStore>,
}

/// Retrieval context for one chat question, ready for the generation step.
#[derive(Debug)]
pub struct QuestionContext {
    pub status: RateLimitStatus,
    /// The asker's active document, if they have one.
    pub session: Option<DocumentSession>,
    pub passages: Vec<ScoredPassage>,
}

impl AppContext {
    pub async fn open(config: Config) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;
        Self::with_provider(config, provider).await
    }

    pub async fn with_provider(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config).await?);

        let limiter = RateLimiter::new(Arc::clone(&store), config.quota_limits())?;
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            config.chunker()?,
            config.session_settings(),
        )?);
        let search = SearchEngine::new(Arc::clone(&store), provider, config.retrieval.top_k);

        Ok(Self {
            config,
            store,
            limiter,
            sessions,
            search,
        })
    }

    /// Quota-check an upload, ingest it, and record the upload.
    ///
    /// # Errors
    ///
    /// `RateLimitExceeded` when the address has no uploads left; nothing is
    /// written in that case.
    pub async fn upload_document(
        &self,
        client_address: &str,
        filename: &str,
        text: &str,
    ) -> Result<DocumentSession> {
        let status = self.limiter.check_status(client_address).await?;
        status.ensure(ActionType::Upload)?;

        let started = Instant::now();
        let session = self
            .sessions
            .ingest_text(client_address, filename, text)
            .await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.limiter
            .record_action(
                client_address,
                ActionType::Upload,
                ActionDetails::default()
                    .with_document(session.id.clone())
                    .with_response_time(elapsed_ms)
                    .with_meta("filename", serde_json::json!(filename))
                    .with_meta("chunks", serde_json::json!(session.chunk_count)),
            )
            .await?;

        tracing::info!(
            client = client_address,
            document_id = %session.id,
            chunks = session.chunk_count,
            elapsed_ms,
            "document ingested"
        );
        Ok(session)
    }

    /// Quota-check a question and retrieve passages from the asker's active
    /// document. The question is not recorded here; call
    /// [`record_question`](Self::record_question) once the answer is sent.
    pub async fn prepare_question(
        &self,
        client_address: &str,
        query: &str,
    ) -> Result<QuestionContext> {
        let status = self.limiter.check_status(client_address).await?;
        status.ensure(ActionType::Question)?;

        let session = self
            .sessions
            .active_session_for(client_address, chrono::Utc::now())
            .await?;
        let (session, passages) = self.passages_for(session, query).await?;

        Ok(QuestionContext {
            status,
            session,
            passages,
        })
    }

    /// Search `session` for `query`. A session deleted since it was looked
    /// up is treated as no session at all.
    pub async fn passages_for(
        &self,
        session: Option<DocumentSession>,
        query: &str,
    ) -> Result<(Option<DocumentSession>, Vec<ScoredPassage>)> {
        let Some(session) = session else {
            return Ok((None, Vec::new()));
        };
        match self.search.search(query, &session.id, None).await {
            Ok(passages) => Ok((Some(session), passages)),
            Err(docent_core::Error::NotFound(_)) => {
                tracing::debug!(document_id = %session.id, "active document expired mid-question");
                Ok((None, Vec::new()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn record_question(
        &self,
        client_address: &str,
        document_id: Option<&str>,
        response_time_ms: u64,
    ) -> Result<()> {
        let mut details = ActionDetails::default().with_response_time(response_time_ms);
        if let Some(id) = document_id {
            details = details.with_document(id);
        }
        self.limiter
            .record_action(client_address, ActionType::Question, details)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
