//! Storage abstraction for Docent.
//!
//! The [`Store`] trait defines every persistence operation the rate
//! limiter, session manager, search engine, and analytics aggregator need,
//! enabling pluggable backends (SQLite in the app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` and must honour the atomicity
//! notes on each method: a session and its chunks are written, read, and
//! deleted as one unit, so a reader racing a cleanup sees either the whole
//! session or nothing.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ActionType, DocumentChunk, DocumentSession, UsageEvent};

/// Per-action event counts for one client address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub questions: u32,
    pub uploads: u32,
}

impl ActionCounts {
    pub fn get(&self, action: ActionType) -> u32 {
        match action {
            ActionType::Question => self.questions,
            ActionType::Upload => self.uploads,
        }
    }
}

/// Abstract storage backend for Docent.
///
/// All operations are async (via `async-trait`) so native backends can
/// await their driver; the in-memory backend returns immediately-ready
/// futures.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`append_event`](Store::append_event) | Append one usage event |
/// | [`append_event_within_limit`](Store::append_event_within_limit) | Atomic count-and-append |
/// | [`count_actions`](Store::count_actions) | Per-address counts in a window |
/// | [`events_in_range`](Store::events_in_range) | Events for analytics |
/// | [`prune_events_before`](Store::prune_events_before) | Retention pruning |
/// | [`insert_session`](Store::insert_session) | Store a session and its chunks |
/// | [`get_session`](Store::get_session) | Session metadata by id |
/// | [`sessions_for_owner`](Store::sessions_for_owner) | An address's sessions |
/// | [`session_chunks`](Store::session_chunks) | Snapshot of a session's chunks |
/// | [`delete_expired_sessions`](Store::delete_expired_sessions) | Expiry cleanup |
/// | [`delete_all_sessions`](Store::delete_all_sessions) | Administrative purge |
#[async_trait]
pub trait Store: Send + Sync {
    /// Append one usage event. Events are never updated afterwards.
    async fn append_event(&self, event: &UsageEvent) -> Result<()>;

    /// Append `event` only if fewer than `limit` events with the same
    /// address and action fall in `since < timestamp <= event.timestamp`,
    /// the same window [`count_actions`](Store::count_actions) uses. The
    /// count and the append are one atomic step. Returns whether the event
    /// was written.
    async fn append_event_within_limit(
        &self,
        event: &UsageEvent,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<bool>;

    /// Count an address's events with `since < timestamp <= until`.
    async fn count_actions(
        &self,
        client_address: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ActionCounts>;

    /// All events with `start <= timestamp < end`, oldest first.
    async fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>>;

    /// Delete events with `timestamp < cutoff`; returns how many.
    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Store a session and all of its chunks, or nothing on failure.
    async fn insert_session(
        &self,
        session: &DocumentSession,
        chunks: &[DocumentChunk],
    ) -> Result<()>;

    async fn get_session(&self, id: &str) -> Result<Option<DocumentSession>>;

    /// An address's sessions, newest first.
    async fn sessions_for_owner(&self, owner_address: &str) -> Result<Vec<DocumentSession>>;

    /// Consistent snapshot of a session's chunks ordered by `chunk_index`.
    ///
    /// `None` when the session does not exist; `Some(vec![])` when it
    /// exists without chunks.
    async fn session_chunks(&self, id: &str) -> Result<Option<Vec<DocumentChunk>>>;

    /// Delete every session with `expires_at <= now` together with its
    /// chunks; returns the number of sessions removed.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Delete every session and chunk regardless of expiry.
    async fn delete_all_sessions(&self) -> Result<u64>;
}
