//! Usage analytics over the event log the rate limiter writes.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::models::{ActionType, UsageEvent, UsageSummary};
use crate::store::Store;

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(Error::Validation(format!(
                "window end ({}) must be after start ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days` days up to and including `now`.
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Result<Self> {
        let out_of_range = || Error::Validation(format!("{} days is out of range", days));
        let start = Duration::try_days(i64::from(days))
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(out_of_range)?;
        // `end` is exclusive; nudge it past `now` so events at `now` count.
        let end = now
            .checked_add_signed(Duration::milliseconds(1))
            .ok_or_else(out_of_range)?;
        Self::new(start, end)
    }
}

/// Aggregate the events recorded in `window`.
pub async fn summarize<S: Store + ?Sized>(store: &S, window: TimeWindow) -> Result<UsageSummary> {
    let events = store.events_in_range(window.start, window.end).await?;
    Ok(aggregate(&events))
}

/// Delete events older than `cutoff`. Retention only; quota counts inside
/// the current window are unaffected as long as `cutoff` precedes it.
pub async fn prune_usage_before<S: Store + ?Sized>(
    store: &S,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    store.prune_events_before(cutoff).await
}

fn aggregate(events: &[UsageEvent]) -> UsageSummary {
    let mut summary = UsageSummary::default();
    let mut clients: HashSet<&str> = HashSet::new();
    let mut latency_total: u128 = 0;
    let mut latency_count: u64 = 0;

    for event in events {
        match event.action {
            ActionType::Question => summary.total_questions += 1,
            ActionType::Upload => summary.total_uploads += 1,
        }
        clients.insert(event.client_address.as_str());
        if let Some(ms) = event.response_time_ms {
            latency_total += u128::from(ms);
            latency_count += 1;
        }
    }

    summary.distinct_clients = clients.len() as u64;
    if latency_count > 0 {
        summary.average_response_time_ms = latency_total as f64 / latency_count as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 10, 0, 0, 0).unwrap()
    }

    fn event(addr: &str, action: ActionType, at: DateTime<Utc>, ms: Option<u64>) -> UsageEvent {
        UsageEvent {
            id: uuid::Uuid::new_v4().to_string(),
            client_address: addr.to_string(),
            action,
            timestamp: at,
            document_id: None,
            response_time_ms: ms,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_window_is_zeroed() {
        let store = InMemoryStore::new();
        let summary = summarize(&store, TimeWindow::last_days(t0(), 7).unwrap())
            .await
            .unwrap();
        assert_eq!(summary, UsageSummary::default());
        assert_eq!(summary.average_response_time_ms, 0.0);
    }

    #[tokio::test]
    async fn test_summary_counts_and_average() {
        let store = InMemoryStore::new();
        let events = [
            event("a", ActionType::Question, t0(), Some(100)),
            event("a", ActionType::Question, t0() + Duration::hours(1), Some(300)),
            event("b", ActionType::Upload, t0() + Duration::hours(2), None),
            event("c", ActionType::Question, t0() + Duration::hours(3), Some(200)),
            // outside the window
            event("d", ActionType::Question, t0() + Duration::days(3), Some(9000)),
        ];
        for e in &events {
            store.append_event(e).await.unwrap();
        }

        let window = TimeWindow::new(t0(), t0() + Duration::days(1)).unwrap();
        let summary = summarize(&store, window).await.unwrap();
        assert_eq!(summary.total_questions, 3);
        assert_eq!(summary.total_uploads, 1);
        assert_eq!(summary.distinct_clients, 3);
        assert!((summary.average_response_time_ms - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_last_days_includes_now() {
        let store = InMemoryStore::new();
        store
            .append_event(&event("a", ActionType::Upload, t0(), None))
            .await
            .unwrap();
        let summary = summarize(&store, TimeWindow::last_days(t0(), 1).unwrap())
            .await
            .unwrap();
        assert_eq!(summary.total_uploads, 1);
    }

    #[test]
    fn test_inverted_window_rejected() {
        assert!(TimeWindow::new(t0(), t0()).is_err());
    }

    #[test]
    fn test_last_days_out_of_range_rejected() {
        assert!(matches!(
            TimeWindow::last_days(t0(), u32::MAX),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            TimeWindow::last_days(DateTime::<Utc>::MAX_UTC, 1),
            Err(Error::Validation(_))
        ));
    }
}
