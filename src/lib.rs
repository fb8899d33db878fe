//! # Docent
//!
//! Usage-governed document retrieval for a grounded chat assistant.
//!
//! Visitors upload a document and ask questions about it. Docent enforces
//! weekly per-address quotas on both actions, keeps each uploaded document
//! for a limited time, and retrieves the passages most similar to a
//! question so the answer can be grounded in them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ RateLimiter  │   │SessionManager│   │ SearchEngine │
//! │ (quota log)  │   │ chunk+embed  │   │ cosine top-k │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        └──────────────────┼──────────────────┘
//!                           ▼
//!                    ┌─────────────┐
//!                    │ SqliteStore │
//!                    └─────────────┘
//! ```
//!
//! The algorithms live in [`docent_core`]; this crate supplies the SQLite
//! store, HTTP embedding providers, configuration, and the `docent` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `Store` backend |
//! | [`embedding`] | Embedding providers and timeout wrapper |
//! | [`app`] | Application context and chat-turn helpers |
//! | [`cleanup`] | Periodic expired-document cleanup |
//! | [`stats`] | Usage summary command |
//! | [`logging`] | `tracing` subscriber setup |

pub mod app;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod embedding;
pub mod logging;
pub mod migrate;
pub mod sqlite_store;
pub mod stats;
