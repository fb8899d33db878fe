//! # Docent Core
//!
//! Shared, runtime-agnostic logic for Docent: data models, the error
//! taxonomy, chunking, the store abstraction, similarity retrieval,
//! usage quotas, document sessions, and usage analytics.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Concrete stores and embedding providers
//! live in the `docent` application crate; an in-memory store is
//! provided here for tests and embedded use.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Usage events, document sessions, chunks, derived snapshots |
//! | [`error`] | Error taxonomy shared by every component |
//! | [`chunk`] | Overlapping text chunker |
//! | [`embedding`] | Embedding provider trait and vector utilities |
//! | [`store`] | Storage trait and the in-memory backend |
//! | [`search`] | Cosine-similarity passage retrieval |
//! | [`quota`] | Rolling-window rate limiter |
//! | [`sessions`] | Document ingestion and expiry |
//! | [`analytics`] | Usage summaries |

pub mod analytics;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod quota;
pub mod search;
pub mod sessions;
pub mod store;

pub use error::{Error, Result};
