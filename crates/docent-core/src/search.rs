//! Similarity search over the chunks of one document session.
//!
//! The search algorithm operates entirely through the [`Store`] and
//! [`EmbeddingProvider`] traits. The calling application supplies both and
//! forwards the returned passages to its generation step.
//!
//! # Ranking Algorithm
//!
//! 1. Take one consistent snapshot of the session's chunks (unknown
//!    session → [`Error::NotFound`]).
//! 2. Return early with no results for an empty snapshot, a blank query,
//!    or `top_k == 0`, without calling the provider.
//! 3. Embed the query with the provider used at ingestion.
//! 4. Score every chunk by cosine similarity (linear scan).
//! 5. Sort by score (desc), then `chunk_index` (asc).
//! 6. Truncate to `top_k`.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::embedding::{cosine_similarity, embed_one, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::DocumentChunk;
use crate::store::Store;

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPassage {
    pub chunk_index: usize,
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Rank `chunks` against `query_vec` and keep the best `top_k`.
///
/// Ties on score keep document order, so the output is fully determined by
/// the inputs.
///
/// # Errors
///
/// [`Error::Provider`] when the query vector and a chunk embedding have
/// different dimensionality, meaning the two sides were embedded by
/// different models.
pub fn rank_chunks(
    query_vec: &[f32],
    chunks: &[DocumentChunk],
    top_k: usize,
) -> Result<Vec<ScoredPassage>> {
    let mut scored = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if chunk.embedding.len() != query_vec.len() {
            return Err(Error::provider(format!(
                "Embedding dimension mismatch: query has {}, chunk {} of {} has {}",
                query_vec.len(),
                chunk.chunk_index,
                chunk.document_id,
                chunk.embedding.len()
            )));
        }
        scored.push(ScoredPassage {
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            score: cosine_similarity(query_vec, &chunk.embedding),
        });
    }

    scored.sort_by(compare_passages);
    scored.truncate(top_k);
    Ok(scored)
}

fn compare_passages(a: &ScoredPassage, b: &ScoredPassage) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.chunk_index.cmp(&b.chunk_index))
}

/// Find the `top_k` passages of `document_id` most similar to `query`.
///
/// This is the core search function that every frontend delegates to.
pub async fn search_document<S: Store + ?Sized>(
    store: &S,
    provider: &dyn EmbeddingProvider,
    query: &str,
    document_id: &str,
    top_k: usize,
) -> Result<Vec<ScoredPassage>> {
    if document_id.trim().is_empty() {
        return Err(Error::Validation("document id is required".into()));
    }

    let chunks = store
        .session_chunks(document_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("document session {}", document_id)))?;

    if chunks.is_empty() || top_k == 0 || query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embed_one(provider, query).await?;
    rank_chunks(&query_vec, &chunks, top_k)
}

/// Search handle bundling a store, the shared embedding provider, and the
/// default result count.
pub struct SearchEngine<S: ?Sized> {
    store: Arc<S>,
    provider: Arc<dyn EmbeddingProvider>,
    default_top_k: usize,
}

impl<S: Store + ?Sized> SearchEngine<S> {
    pub fn new(store: Arc<S>, provider: Arc<dyn EmbeddingProvider>, default_top_k: usize) -> Self {
        Self {
            store,
            provider,
            default_top_k,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Ranked passages, `top_k` falling back to the configured default.
    pub async fn search(
        &self,
        query: &str,
        document_id: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<ScoredPassage>> {
        let k = top_k.unwrap_or(self.default_top_k);
        search_document(self.store.as_ref(), self.provider.as_ref(), query, document_id, k).await
    }
}
