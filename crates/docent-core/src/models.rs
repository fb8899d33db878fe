//! Core data models used throughout Docent.
//!
//! Usage events are the append-only record the rate limiter and the
//! analytics aggregator read; document sessions and their chunks are the
//! retrieval side. [`RateLimitStatus`] and [`UsageSummary`] are derived
//! snapshots and are never persisted.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A governed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Question,
    Upload,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Question => "question",
            ActionType::Upload => "upload",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "question" => Ok(ActionType::Question),
            "upload" => Ok(ActionType::Upload),
            other => Err(Error::Validation(format!(
                "Unknown action type: '{}'. Use question or upload.",
                other
            ))),
        }
    }
}

/// One record per governed action. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: String,
    pub client_address: String,
    pub action: ActionType,
    pub timestamp: DateTime<Utc>,
    pub document_id: Option<String>,
    pub response_time_ms: Option<u64>,
    /// Diagnostic context only (tags, message counts). Nothing branches on it.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Optional details supplied when recording an action.
#[derive(Debug, Clone, Default)]
pub struct ActionDetails {
    pub document_id: Option<String>,
    pub response_time_ms: Option<u64>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ActionDetails {
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_response_time(mut self, ms: u64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// One uploaded document. `expires_at > created_at` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSession {
    pub id: String,
    pub owner_address: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub chunk_count: usize,
}

impl DocumentSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// One passage of a document with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Quota snapshot for one client address, computed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub questions_used: u32,
    pub questions_limit: u32,
    pub can_question: bool,
    pub uploads_used: u32,
    pub uploads_limit: u32,
    pub can_upload: bool,
    /// Start of the rolling window (exclusive).
    pub window_start: DateTime<Utc>,
    /// The evaluation instant (inclusive).
    pub window_end: DateTime<Utc>,
}

impl RateLimitStatus {
    pub fn used(&self, action: ActionType) -> u32 {
        match action {
            ActionType::Question => self.questions_used,
            ActionType::Upload => self.uploads_used,
        }
    }

    pub fn limit(&self, action: ActionType) -> u32 {
        match action {
            ActionType::Question => self.questions_limit,
            ActionType::Upload => self.uploads_limit,
        }
    }

    pub fn allows(&self, action: ActionType) -> bool {
        match action {
            ActionType::Question => self.can_question,
            ActionType::Upload => self.can_upload,
        }
    }

    /// Turn a spent quota into [`Error::RateLimitExceeded`].
    pub fn ensure(&self, action: ActionType) -> Result<(), Error> {
        if self.allows(action) {
            Ok(())
        } else {
            Err(Error::RateLimitExceeded {
                action,
                used: self.used(action),
                limit: self.limit(action),
            })
        }
    }
}

/// Platform-wide aggregate over a time window.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UsageSummary {
    pub total_questions: u64,
    pub total_uploads: u64,
    pub distinct_clients: u64,
    pub average_response_time_ms: f64,
}
