//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Sessions and chunks share one lock so every session-level read or
//! delete is a single critical section; the usage log has its own lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{ActionType, DocumentChunk, DocumentSession, UsageEvent};

use super::{ActionCounts, Store};

#[derive(Default)]
struct Documents {
    sessions: HashMap<String, DocumentSession>,
    chunks: HashMap<String, Vec<DocumentChunk>>,
}

/// In-memory store. State lives as long as the value.
#[derive(Default)]
pub struct InMemoryStore {
    events: RwLock<Vec<UsageEvent>>,
    documents: RwLock<Documents>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> Error {
    Error::storage(anyhow::anyhow!("in-memory store lock poisoned"))
}

fn tally(
    events: &[UsageEvent],
    client_address: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> ActionCounts {
    let mut counts = ActionCounts::default();
    let in_window = events.iter().filter(|e| {
        e.client_address == client_address && e.timestamp > since && e.timestamp <= until
    });
    for e in in_window {
        match e.action {
            ActionType::Question => counts.questions += 1,
            ActionType::Upload => counts.uploads += 1,
        }
    }
    counts
}

#[async_trait]
impl Store for InMemoryStore {
    async fn append_event(&self, event: &UsageEvent) -> Result<()> {
        self.events.write().map_err(poisoned)?.push(event.clone());
        Ok(())
    }

    async fn append_event_within_limit(
        &self,
        event: &UsageEvent,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<bool> {
        let mut events = self.events.write().map_err(poisoned)?;
        let counts = tally(&events, &event.client_address, since, event.timestamp);
        if counts.get(event.action) >= limit {
            return Ok(false);
        }
        events.push(event.clone());
        Ok(true)
    }

    async fn count_actions(
        &self,
        client_address: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ActionCounts> {
        let events = self.events.read().map_err(poisoned)?;
        Ok(tally(&events, client_address, since, until))
    }

    async fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>> {
        let events = self.events.read().map_err(poisoned)?;
        let mut found: Vec<UsageEvent> = events
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.timestamp);
        Ok(found)
    }

    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut events = self.events.write().map_err(poisoned)?;
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }

    async fn insert_session(
        &self,
        session: &DocumentSession,
        chunks: &[DocumentChunk],
    ) -> Result<()> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        if docs.sessions.contains_key(&session.id) {
            return Err(Error::storage(anyhow::anyhow!(
                "document session {} already exists",
                session.id
            )));
        }
        let mut ordered = chunks.to_vec();
        ordered.sort_by_key(|c| c.chunk_index);
        docs.sessions.insert(session.id.clone(), session.clone());
        docs.chunks.insert(session.id.clone(), ordered);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<DocumentSession>> {
        let docs = self.documents.read().map_err(poisoned)?;
        Ok(docs.sessions.get(id).cloned())
    }

    async fn sessions_for_owner(&self, owner_address: &str) -> Result<Vec<DocumentSession>> {
        let docs = self.documents.read().map_err(poisoned)?;
        let mut found: Vec<DocumentSession> = docs
            .sessions
            .values()
            .filter(|s| s.owner_address == owner_address)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn session_chunks(&self, id: &str) -> Result<Option<Vec<DocumentChunk>>> {
        let docs = self.documents.read().map_err(poisoned)?;
        if !docs.sessions.contains_key(id) {
            return Ok(None);
        }
        Ok(Some(docs.chunks.get(id).cloned().unwrap_or_default()))
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        let expired: Vec<String> = docs
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            docs.sessions.remove(id);
            docs.chunks.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn delete_all_sessions(&self) -> Result<u64> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        let removed = docs.sessions.len() as u64;
        docs.sessions.clear();
        docs.chunks.clear();
        Ok(removed)
    }
}
