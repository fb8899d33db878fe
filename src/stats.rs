//! Usage and storage overview.
//!
//! Prints the analytics summary for a recent window alongside database
//! totals (events, live and expired sessions, stored chunks). Used by
//! `docent stats`.

use anyhow::Result;
use chrono::Utc;

use docent_core::analytics::{summarize, TimeWindow};

use crate::app::AppContext;

/// Run the stats command: aggregate the last `days` days and print a summary.
pub async fn run_stats(ctx: &AppContext, days: u32) -> Result<()> {
    let now = Utc::now();
    let window = TimeWindow::last_days(now, days)?;
    let summary = summarize(ctx.store.as_ref(), window).await?;

    let pool = ctx.store.pool();
    let total_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_events")
        .fetch_one(pool)
        .await?;
    let total_sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_sessions")
        .fetch_one(pool)
        .await?;
    let expired_sessions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM document_sessions WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .fetch_one(pool)
            .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
        .fetch_one(pool)
        .await?;

    let db_size = std::fs::metadata(&ctx.config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Docent Usage Stats");
    println!("====================");
    println!();
    println!("  Database:    {}", ctx.config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Last {} day{} ({} → {}):",
        days,
        if days == 1 { "" } else { "s" },
        window.start.format("%Y-%m-%d %H:%M"),
        now.format("%Y-%m-%d %H:%M")
    );
    println!("    Questions:        {}", summary.total_questions);
    println!("    Uploads:          {}", summary.total_uploads);
    println!("    Distinct clients: {}", summary.distinct_clients);
    println!(
        "    Avg response:     {:.1} ms",
        summary.average_response_time_ms
    );
    println!();
    println!("  Stored:");
    println!("    Usage events:     {}", total_events);
    println!(
        "    Documents:        {} ({} awaiting cleanup)",
        total_sessions, expired_sessions
    );
    println!("    Chunks:           {}", total_chunks);
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
