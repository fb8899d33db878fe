//! # Docent CLI (`docent`)
//!
//! Administrative and diagnostic front end for the usage-governed
//! retrieval subsystem.
//!
//! ## Usage
//!
//! ```bash
//! docent --config ./config/docent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent init` | Create the SQLite database and run schema migrations |
//! | `docent ingest <file> --owner <addr>` | Upload a plain-text document for an address |
//! | `docent search <document-id> "<query>"` | Rank a document's passages against a query |
//! | `docent ask <addr> "<question>"` | Quota-check, retrieve, and record one chat question |
//! | `docent status <addr>` | Show an address's quota usage |
//! | `docent record <addr> <question\|upload>` | Append one usage event |
//! | `docent cleanup` | Remove expired document sessions |
//! | `docent purge` | Remove every document session |
//! | `docent stats` | Usage summary and storage totals |
//! | `docent prune --days <n>` | Delete usage events older than n days |
//! | `docent worker` | Run periodic cleanup until Ctrl-C |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use docent::app::AppContext;
use docent::{cleanup, config, logging, migrate, stats};
use docent_core::analytics::{prune_usage_before, TimeWindow};
use docent_core::models::{ActionDetails, ActionType};
use docent_core::quota::Admission;

/// Docent: usage-governed document retrieval for a grounded chat assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Docent: weekly quotas, expiring document sessions, and passage retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Upload a plain-text document on behalf of a client address.
    ///
    /// Checks the upload quota, chunks and embeds the text, stores the
    /// session, and records the upload.
    Ingest {
        /// Path to a UTF-8 text file.
        file: PathBuf,

        /// Client address that owns the document.
        #[arg(long)]
        owner: String,

        /// Display name; defaults to the file name.
        #[arg(long)]
        filename: Option<String>,
    },

    /// Rank a document's passages against a query.
    Search {
        /// Document session id.
        document_id: String,

        /// The search query string.
        query: String,

        /// Number of passages to return (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Run one chat turn without generation: check the question quota,
    /// retrieve passages from the asker's active document, and record the
    /// question.
    Ask {
        /// Client address asking.
        address: String,

        /// The question.
        question: String,
    },

    /// Show quota usage for a client address.
    Status {
        address: String,

        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Append one usage event. The quota is only consulted with `--strict`.
    Record {
        address: String,

        /// `question` or `upload`.
        action: ActionType,

        /// Related document session id.
        #[arg(long)]
        document: Option<String>,

        /// Observed response time in milliseconds.
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Refuse to record when the quota is spent (atomic check-and-record).
        #[arg(long)]
        strict: bool,
    },

    /// Remove expired document sessions and their chunks.
    Cleanup,

    /// Remove every document session regardless of expiry.
    Purge,

    /// Show a usage summary and storage totals.
    Stats {
        /// Size of the summary window in days.
        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// Delete usage events older than the given number of days.
    Prune {
        /// Must be at least the quota window so live quotas are untouched.
        #[arg(long)]
        days: u32,
    },

    /// Run periodic cleanup until interrupted.
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.filter);

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let ctx = AppContext::open(cfg).await?;
    let result = run(&ctx, cli.command).await;
    ctx.close().await;
    result
}

async fn run(ctx: &AppContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init => {}
        Commands::Ingest {
            file,
            owner,
            filename,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = filename.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string())
            });
            let session = ctx.upload_document(&owner, &name, &text).await?;
            println!("Document ingested.");
            println!("  id:       {}", session.id);
            println!("  file:     {}", session.filename);
            println!("  chunks:   {}", session.chunk_count);
            println!("  expires:  {}", session.expires_at.to_rfc3339());
        }
        Commands::Search {
            document_id,
            query,
            top_k,
        } => {
            let passages = ctx.search.search(&query, &document_id, top_k).await?;
            if passages.is_empty() {
                println!("No results.");
            }
            for (rank, p) in passages.iter().enumerate() {
                println!("{}. [chunk {}] score={:.4}", rank + 1, p.chunk_index, p.score);
                println!("   {}", p.text.replace('\n', " "));
            }
        }
        Commands::Ask { address, question } => {
            let started = Instant::now();
            let turn = ctx.prepare_question(&address, &question).await?;
            match &turn.session {
                Some(s) => println!("Active document: {} ({})", s.filename, s.id),
                None => println!("No active document; answering without context."),
            }
            for p in &turn.passages {
                println!("  [chunk {}] score={:.4}", p.chunk_index, p.score);
            }
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let document_id = turn.session.as_ref().map(|s| s.id.as_str());
            ctx.record_question(&address, document_id, elapsed_ms).await?;
            println!(
                "Questions used: {}/{}",
                turn.status.questions_used + 1,
                turn.status.questions_limit
            );
        }
        Commands::Status { address, json } => {
            let status = ctx.limiter.check_status(&address).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Quota for {}", address);
                println!(
                    "  questions: {}/{} ({})",
                    status.questions_used,
                    status.questions_limit,
                    if status.can_question { "allowed" } else { "limit reached" }
                );
                println!(
                    "  uploads:   {}/{} ({})",
                    status.uploads_used,
                    status.uploads_limit,
                    if status.can_upload { "allowed" } else { "limit reached" }
                );
                println!("  window:    since {}", status.window_start.to_rfc3339());
            }
        }
        Commands::Record {
            address,
            action,
            document,
            latency_ms,
            strict,
        } => {
            let mut details =
                ActionDetails::default().with_meta("source", serde_json::json!("cli"));
            if let Some(id) = document {
                details = details.with_document(id);
            }
            if let Some(ms) = latency_ms {
                details = details.with_response_time(ms);
            }

            if strict {
                match ctx.limiter.check_and_record(&address, action, details).await? {
                    Admission::Recorded(event) => {
                        println!("Recorded {} for {} ({})", action, address, event.id);
                    }
                    Admission::Denied(status) => {
                        return Err(docent_core::Error::RateLimitExceeded {
                            action,
                            used: status.used(action),
                            limit: status.limit(action),
                        }
                        .into());
                    }
                }
            } else {
                let event = ctx.limiter.record_action(&address, action, details).await?;
                println!("Recorded {} for {} ({})", action, address, event.id);
            }
        }
        Commands::Cleanup => {
            let removed = cleanup::run_once(ctx.sessions.as_ref()).await?;
            println!("Removed {} expired document session(s).", removed);
        }
        Commands::Purge => {
            let removed = ctx.sessions.purge_all().await?;
            tracing::warn!(removed, "all document sessions purged");
            println!("Purged {} document session(s).", removed);
        }
        Commands::Stats { days } => {
            stats::run_stats(ctx, days).await?;
        }
        Commands::Prune { days } => {
            if days < ctx.config.quota.window_days {
                anyhow::bail!(
                    "prune --days must be >= quota.window_days ({})",
                    ctx.config.quota.window_days
                );
            }
            let cutoff = TimeWindow::last_days(chrono::Utc::now(), days)?.start;
            let removed = prune_usage_before(ctx.store.as_ref(), cutoff).await?;
            println!("Pruned {} usage event(s).", removed);
        }
        Commands::Worker => {
            let interval = Duration::from_secs(ctx.config.cleanup.interval_secs);
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle = cleanup::spawn_cleanup_task(
                std::sync::Arc::clone(&ctx.sessions),
                interval,
                shutdown_rx,
            );
            tracing::info!(interval_secs = interval.as_secs(), "cleanup worker started");

            tokio::signal::ctrl_c().await?;
            let _ = shutdown_tx.send(true);
            handle.await?;
            println!("Worker stopped.");
        }
    }
    Ok(())
}
