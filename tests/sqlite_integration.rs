//! End-to-end behaviour of the core components over the SQLite store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tempfile::TempDir;

use docent::app::AppContext;
use docent::cleanup::spawn_cleanup_task;
use docent::config::{load_config, Config};
use docent::migrate::apply_schema;
use docent::sqlite_store::SqliteStore;
use docent_core::analytics::{prune_usage_before, summarize, TimeWindow};
use docent_core::embedding::EmbeddingProvider;
use docent_core::models::{ActionDetails, ActionType};
use docent_core::quota::{Admission, RateLimiter};
use docent_core::store::Store;
use docent_core::Error;

/// Embeds text as its lowercase letter histogram.
struct LetterHistogram;

#[async_trait]
impl EmbeddingProvider for LetterHistogram {
    fn model_name(&self) -> &str {
        "letter-histogram"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, texts: &[String]) -> docent_core::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.chars().filter(|c| c.is_ascii_alphabetic()) {
                    v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap()
}

fn write_config(root: &Path, extra: &str) -> PathBuf {
    let path = root.join("docent.toml");
    let content = format!(
        "[db]\npath = \"{}/data/docent.sqlite\"\n\n\
         [chunking]\nmax_chars = 60\noverlap_chars = 10\n\n{}",
        root.display(),
        extra
    );
    std::fs::write(&path, content).unwrap();
    path
}

fn test_config(extra: &str) -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let path = write_config(tmp.path(), extra);
    let config = load_config(&path).unwrap();
    (tmp, config)
}

async fn open_store(config: &Config) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open(config).await.unwrap())
}

#[tokio::test]
async fn test_question_quota_rolls_over() {
    let (_tmp, config) = test_config("");
    let store = open_store(&config).await;
    let limiter = RateLimiter::new(Arc::clone(&store), config.quota_limits()).unwrap();

    for i in 0..5 {
        let at = t0() + Duration::hours(i);
        let status = limiter.check_status_at("203.0.113.7", at).await.unwrap();
        assert!(status.can_question);
        assert_eq!(status.questions_used, i as u32);
        limiter
            .record_action_at(
                "203.0.113.7",
                ActionType::Question,
                ActionDetails::default().with_response_time(120),
                at,
            )
            .await
            .unwrap();
    }

    let spent = limiter
        .check_status_at("203.0.113.7", t0() + Duration::days(1))
        .await
        .unwrap();
    assert!(!spent.can_question);
    assert_eq!(spent.questions_used, 5);
    assert!(spent.can_upload);

    // The first question ages out exactly seven days after it was asked.
    let reopened = limiter
        .check_status_at("203.0.113.7", t0() + Duration::days(7))
        .await
        .unwrap();
    assert!(reopened.can_question);
    assert_eq!(reopened.questions_used, 4);

    store.close().await;
}

#[tokio::test]
async fn test_strict_admission_under_concurrency() {
    let (_tmp, config) = test_config("[quota]\nquestions_per_window = 3\n");
    let store = open_store(&config).await;
    let limiter = Arc::new(RateLimiter::new(Arc::clone(&store), config.quota_limits()).unwrap());

    let mut handles = Vec::new();
    for _ in 0..12 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            let details = ActionDetails::default();
            limiter
                .check_and_record_at("198.51.100.1", ActionType::Question, details, t0())
                .await
                .unwrap()
        }));
    }

    let mut recorded = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), Admission::Recorded(_)) {
            recorded += 1;
        }
    }
    assert_eq!(recorded, 3);

    let status = limiter.check_status_at("198.51.100.1", t0()).await.unwrap();
    assert_eq!(status.questions_used, 3);
    store.close().await;
}

#[tokio::test]
async fn test_retention_and_cascade() {
    let (_tmp, config) = test_config("");
    let ctx = AppContext::with_provider(config, Arc::new(LetterHistogram))
        .await
        .unwrap();

    let text = "Quarterly revenue grew strongly.\n\n\
                Headcount stayed flat while margins improved across every region we operate in.";
    let session = ctx
        .sessions
        .ingest_text_at("192.0.2.10", "report.txt", text, t0())
        .await
        .unwrap();
    assert!(session.chunk_count > 1);
    assert_eq!(session.expires_at, t0() + Duration::hours(24));

    assert_eq!(ctx.sessions.cleanup_expired(t0() + Duration::hours(23)).await.unwrap(), 0);
    assert!(ctx.sessions.get_session(&session.id).await.is_ok());

    assert_eq!(ctx.sessions.cleanup_expired(t0() + Duration::hours(25)).await.unwrap(), 1);
    assert!(matches!(
        ctx.sessions.get_session(&session.id).await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(ctx.sessions.cleanup_expired(t0() + Duration::hours(25)).await.unwrap(), 0);

    let orphaned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
        .fetch_one(ctx.store.pool())
        .await
        .unwrap();
    assert_eq!(orphaned, 0);

    ctx.close().await;
}

#[tokio::test]
async fn test_search_ranks_stored_chunks() {
    let (_tmp, config) = test_config("[retrieval]\ntop_k = 2\n");
    let ctx = AppContext::with_provider(config, Arc::new(LetterHistogram))
        .await
        .unwrap();

    let chunks = vec![
        "zzzz zzzz zzzz".to_string(),
        "apples and bananas".to_string(),
        "xylophone quartz".to_string(),
    ];
    let session = ctx
        .sessions
        .create_session("192.0.2.10", "fruit.txt", chunks)
        .await
        .unwrap();

    let results = ctx.search.search("banana apples", &session.id, None).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk_index, 1);
    assert!(results[0].score >= results[1].score);

    let all = ctx.search.search("banana", &session.id, Some(10)).await.unwrap();
    assert_eq!(all.len(), 3);

    let again = ctx.search.search("banana", &session.id, Some(10)).await.unwrap();
    assert_eq!(all, again);

    let missing = ctx.search.search("banana", "no-such-document", None).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));

    ctx.close().await;
}

#[tokio::test]
async fn test_upload_quota_blocks_third_upload() {
    let (_tmp, config) = test_config("");
    let ctx = AppContext::with_provider(config, Arc::new(LetterHistogram))
        .await
        .unwrap();

    ctx.upload_document("192.0.2.20", "a.txt", "first document")
        .await
        .unwrap();
    // Keep creation times distinct so "newest" is well defined.
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    ctx.upload_document("192.0.2.20", "b.txt", "second document")
        .await
        .unwrap();

    let err = ctx
        .upload_document("192.0.2.20", "c.txt", "third document")
        .await
        .unwrap_err();
    match err.downcast_ref::<Error>() {
        Some(Error::RateLimitExceeded { used, limit, .. }) => {
            assert_eq!((*used, *limit), (2, 2));
        }
        other => panic!("expected RateLimitExceeded, got {:?}", other),
    }

    // The rejected upload left nothing behind.
    assert_eq!(ctx.store.sessions_for_owner("192.0.2.20").await.unwrap().len(), 2);

    let turn = ctx.prepare_question("192.0.2.20", "second").await.unwrap();
    assert_eq!(turn.session.map(|s| s.filename), Some("b.txt".to_string()));
    assert!(!turn.passages.is_empty());

    ctx.close().await;
}

#[tokio::test]
async fn test_summary_and_prune() {
    let (_tmp, config) = test_config("");
    let store = open_store(&config).await;
    let limiter = RateLimiter::new(Arc::clone(&store), config.quota_limits()).unwrap();

    let plan = [
        ("a", ActionType::Question, Some(100), 0),
        ("a", ActionType::Upload, None, 1),
        ("b", ActionType::Question, Some(300), 2),
        ("c", ActionType::Question, None, 40),
    ];
    for (addr, action, latency, days_ago) in plan {
        let mut details = ActionDetails::default().with_meta("note", serde_json::json!(addr));
        if let Some(ms) = latency {
            details = details.with_response_time(ms);
        }
        limiter
            .record_action_at(addr, action, details, t0() - Duration::days(days_ago))
            .await
            .unwrap();
    }

    let summary = summarize(store.as_ref(), TimeWindow::last_days(t0(), 7).unwrap())
        .await
        .unwrap();
    assert_eq!(summary.total_questions, 2);
    assert_eq!(summary.total_uploads, 1);
    assert_eq!(summary.distinct_clients, 2);
    assert!((summary.average_response_time_ms - 200.0).abs() < 1e-9);

    let events = store
        .events_in_range(t0() - Duration::days(1), t0() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].metadata.get("note"), Some(&serde_json::json!("a")));

    let pruned = prune_usage_before(store.as_ref(), t0() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(pruned, 1);

    store.close().await;
}

#[tokio::test]
async fn test_usage_survives_reopen() {
    let (_tmp, config) = test_config("");
    {
        let store = open_store(&config).await;
        let limiter = RateLimiter::new(Arc::clone(&store), config.quota_limits()).unwrap();
        limiter
            .record_action("192.0.2.30", ActionType::Upload, ActionDetails::default())
            .await
            .unwrap();
        store.close().await;
    }

    let store = open_store(&config).await;
    let limiter = RateLimiter::new(Arc::clone(&store), config.quota_limits()).unwrap();
    let status = limiter.check_status("192.0.2.30").await.unwrap();
    assert_eq!(status.uploads_used, 1);
    store.close().await;
}

#[tokio::test]
async fn test_cleanup_task_removes_expired_sessions() {
    let (_tmp, config) = test_config("");
    let ctx = AppContext::with_provider(config, Arc::new(LetterHistogram))
        .await
        .unwrap();

    let long_ago = Utc::now() - Duration::hours(48);
    let session = ctx
        .sessions
        .ingest_text_at("192.0.2.40", "old.txt", "stale upload", long_ago)
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = spawn_cleanup_task(Arc::clone(&ctx.sessions), StdDuration::from_millis(20), rx);

    let mut gone = false;
    for _ in 0..50 {
        if ctx.store.get_session(&session.id).await.unwrap().is_none() {
            gone = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert!(gone, "expired session was not cleaned up");

    tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    ctx.close().await;
}

#[tokio::test]
async fn test_cancelled_admission_releases_connection() {
    let (_tmp, config) = test_config("");
    let options = SqliteConnectOptions::new()
        .filename(&config.db.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    std::fs::create_dir_all(config.db.path.parent().unwrap()).unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));
    let limiter = RateLimiter::new(Arc::clone(&store), config.quota_limits()).unwrap();

    for _ in 0..40 {
        let _ = tokio::time::timeout(
            StdDuration::from_micros(1),
            limiter.check_and_record_at(
                "192.0.2.50",
                ActionType::Question,
                ActionDetails::default(),
                t0(),
            ),
        )
        .await;

        let next = limiter
            .check_and_record_at("192.0.2.51", ActionType::Question, ActionDetails::default(), t0())
            .await;
        assert!(next.is_ok(), "admission after cancellation failed: {:?}", next);
    }

    limiter
        .record_action_at("192.0.2.52", ActionType::Upload, ActionDetails::default(), t0())
        .await
        .unwrap();

    // A second pool only sees committed rows.
    let other = open_store(&config).await;
    let counts = other
        .count_actions("192.0.2.52", t0() - Duration::days(7), t0())
        .await
        .unwrap();
    assert_eq!(counts.uploads, 1);
    let counts = other
        .count_actions("192.0.2.51", t0() - Duration::days(7), t0())
        .await
        .unwrap();
    assert_eq!(counts.questions, 5);

    other.close().await;
    store.close().await;
}

#[tokio::test]
async fn test_search_racing_cleanup_sees_whole_session_or_nothing() {
    let (_tmp, config) = test_config("");
    let ctx = Arc::new(
        AppContext::with_provider(config, Arc::new(LetterHistogram))
            .await
            .unwrap(),
    );

    let text = "Every paragraph here is long enough to need its own chunk. ".repeat(12);
    let long_ago = Utc::now() - Duration::hours(48);
    let session = ctx
        .sessions
        .ingest_text_at("192.0.2.60", "expired.txt", &text, long_ago)
        .await
        .unwrap();
    let expected = session.chunk_count;
    assert!(expected > 3);

    let mut readers = Vec::new();
    for _ in 0..8 {
        let ctx = Arc::clone(&ctx);
        let id = session.id.clone();
        readers.push(tokio::spawn(async move {
            let mut outcomes = Vec::new();
            for _ in 0..25 {
                outcomes.push(ctx.search.search("paragraph chunk", &id, Some(expected)).await);
                tokio::task::yield_now().await;
            }
            outcomes
        }));
    }

    let cleaner = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            ctx.sessions.cleanup_expired(Utc::now()).await.unwrap()
        })
    };

    assert_eq!(cleaner.await.unwrap(), 1);
    for reader in readers {
        for outcome in reader.await.unwrap() {
            match outcome {
                Ok(passages) => assert_eq!(passages.len(), expected),
                Err(Error::NotFound(_)) => {}
                Err(other) => panic!("unexpected search error: {:?}", other),
            }
        }
    }
    assert!(matches!(
        ctx.search.search("paragraph", &session.id, None).await,
        Err(Error::NotFound(_))
    ));

    ctx.close().await;
}

#[tokio::test]
async fn test_vanished_session_yields_no_passages() {
    let (_tmp, config) = test_config("");
    let ctx = AppContext::with_provider(config, Arc::new(LetterHistogram))
        .await
        .unwrap();

    let session = ctx
        .sessions
        .ingest_text("192.0.2.70", "gone.txt", "short lived notes")
        .await
        .unwrap();
    assert_eq!(ctx.sessions.purge_all().await.unwrap(), 1);

    let (found, passages) = ctx.passages_for(Some(session), "notes").await.unwrap();
    assert!(found.is_none());
    assert!(passages.is_empty());

    let turn = ctx.prepare_question("192.0.2.70", "notes").await.unwrap();
    assert!(turn.session.is_none());

    ctx.close().await;
}

#[tokio::test]
async fn test_unrepresentable_latency_rejected() {
    let (_tmp, config) = test_config("");
    let store = open_store(&config).await;
    let limiter = RateLimiter::new(Arc::clone(&store), config.quota_limits()).unwrap();

    let details = ActionDetails::default().with_response_time(u64::MAX);
    let err = limiter
        .record_action_at("192.0.2.80", ActionType::Question, details.clone(), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = limiter
        .check_and_record_at("192.0.2.80", ActionType::Question, details, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let counts = store
        .count_actions("192.0.2.80", t0() - Duration::days(7), t0())
        .await
        .unwrap();
    assert_eq!(counts.questions, 0);
    store.close().await;
}
