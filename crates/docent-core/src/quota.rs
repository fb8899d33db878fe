//! Rolling-window usage quotas per client address.
//!
//! Usage is an append-only log of [`UsageEvent`]s; quota state is derived
//! by counting an address's events inside a window that ends at the moment
//! of evaluation and reaches back [`QuotaLimits::window`]. Usage therefore
//! ages out continuously instead of resetting on a calendar boundary.
//!
//! Two ways to gate an action:
//!
//! - [`RateLimiter::check_status`] then [`RateLimiter::record_action`]:
//!   the soft limit. Concurrent requests from one address can both pass
//!   the check and both record, overshooting by a small margin.
//! - [`RateLimiter::check_and_record`]: the strict limit. The store counts
//!   and appends in one atomic step.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::models::{ActionDetails, ActionType, RateLimitStatus, UsageEvent};
use crate::store::Store;

/// Configured per-window limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub questions_per_window: u32,
    pub uploads_per_window: u32,
    pub window: Duration,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            questions_per_window: 5,
            uploads_per_window: 2,
            window: Duration::days(7),
        }
    }
}

impl QuotaLimits {
    pub fn limit(&self, action: ActionType) -> u32 {
        match action {
            ActionType::Question => self.questions_per_window,
            ActionType::Upload => self.uploads_per_window,
        }
    }
}

/// Outcome of [`RateLimiter::check_and_record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Recorded(UsageEvent),
    Denied(RateLimitStatus),
}

pub struct RateLimiter<S: ?Sized> {
    store: Arc<S>,
    limits: QuotaLimits,
}

impl<S: Store + ?Sized> RateLimiter<S> {
    /// # Errors
    ///
    /// [`Error::Validation`] if the window is not positive.
    pub fn new(store: Arc<S>, limits: QuotaLimits) -> Result<Self> {
        if limits.window <= Duration::zero() {
            return Err(Error::Validation("quota window must be positive".into()));
        }
        Ok(Self { store, limits })
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    pub async fn check_status(&self, client_address: &str) -> Result<RateLimitStatus> {
        self.check_status_at(client_address, Utc::now()).await
    }

    /// Quota snapshot for `client_address` as of `now`. Read-only.
    pub async fn check_status_at(
        &self,
        client_address: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus> {
        validate_address(client_address)?;
        let window_start = now - self.limits.window;
        let counts = self
            .store
            .count_actions(client_address, window_start, now)
            .await?;

        Ok(RateLimitStatus {
            questions_used: counts.questions,
            questions_limit: self.limits.questions_per_window,
            can_question: counts.questions < self.limits.questions_per_window,
            uploads_used: counts.uploads,
            uploads_limit: self.limits.uploads_per_window,
            can_upload: counts.uploads < self.limits.uploads_per_window,
            window_start,
            window_end: now,
        })
    }

    pub async fn record_action(
        &self,
        client_address: &str,
        action: ActionType,
        details: ActionDetails,
    ) -> Result<UsageEvent> {
        self.record_action_at(client_address, action, details, Utc::now())
            .await
    }

    /// Append one event. Does not re-check the quota; pair with
    /// [`check_status_at`](Self::check_status_at) or use
    /// [`check_and_record_at`](Self::check_and_record_at).
    pub async fn record_action_at(
        &self,
        client_address: &str,
        action: ActionType,
        details: ActionDetails,
        now: DateTime<Utc>,
    ) -> Result<UsageEvent> {
        validate_address(client_address)?;
        let event = new_event(client_address, action, details, now);
        self.store.append_event(&event).await?;
        Ok(event)
    }

    pub async fn check_and_record(
        &self,
        client_address: &str,
        action: ActionType,
        details: ActionDetails,
    ) -> Result<Admission> {
        self.check_and_record_at(client_address, action, details, Utc::now())
            .await
    }

    /// Record the action only if the address still has quota, atomically.
    pub async fn check_and_record_at(
        &self,
        client_address: &str,
        action: ActionType,
        details: ActionDetails,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        validate_address(client_address)?;
        let event = new_event(client_address, action, details, now);
        let since = now - self.limits.window;
        let written = self
            .store
            .append_event_within_limit(&event, since, self.limits.limit(action))
            .await?;

        if written {
            Ok(Admission::Recorded(event))
        } else {
            Ok(Admission::Denied(self.check_status_at(client_address, now).await?))
        }
    }
}

fn validate_address(client_address: &str) -> Result<()> {
    if client_address.trim().is_empty() {
        return Err(Error::Validation("client address is required".into()));
    }
    Ok(())
}

fn new_event(
    client_address: &str,
    action: ActionType,
    details: ActionDetails,
    now: DateTime<Utc>,
) -> UsageEvent {
    UsageEvent {
        id: uuid::Uuid::new_v4().to_string(),
        client_address: client_address.to_string(),
        action,
        timestamp: now,
        document_id: details.document_id,
        response_time_ms: details.response_time_ms,
        metadata: details.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    fn limiter(questions: u32, uploads: u32) -> RateLimiter<InMemoryStore> {
        RateLimiter::new(
            Arc::new(InMemoryStore::new()),
            QuotaLimits {
                questions_per_window: questions,
                uploads_per_window: uploads,
                window: Duration::days(7),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_client_allowed() {
        let rl = limiter(5, 2);
        let status = rl.check_status_at("A", t0()).await.unwrap();
        assert!(status.can_question);
        assert!(status.can_upload);
        assert_eq!(status.questions_used, 0);
        assert_eq!(status.window_start, t0() - Duration::days(7));
        assert_eq!(status.window_end, t0());
    }

    #[tokio::test]
    async fn test_five_questions_exhaust_quota() {
        let rl = limiter(5, 2);
        for i in 0..5 {
            let status = rl.check_status_at("A", t0() + Duration::minutes(i)).await.unwrap();
            assert!(status.can_question);
            assert_eq!(status.questions_used, i as u32);
            let at = t0() + Duration::minutes(i);
            rl.record_action_at("A", ActionType::Question, ActionDetails::default(), at)
                .await
                .unwrap();
        }

        let status = rl.check_status_at("A", t0() + Duration::minutes(10)).await.unwrap();
        assert!(!status.can_question);
        assert_eq!(status.questions_used, 5);
        assert!(status.can_upload);

        let other = rl.check_status_at("B", t0() + Duration::minutes(10)).await.unwrap();
        assert!(other.can_question);
    }

    #[tokio::test]
    async fn test_usage_ages_out_of_rolling_window() {
        let rl = limiter(2, 2);
        rl.record_action_at("A", ActionType::Question, ActionDetails::default(), t0())
            .await
            .unwrap();
        let later = t0() + Duration::days(3);
        rl.record_action_at("A", ActionType::Question, ActionDetails::default(), later)
            .await
            .unwrap();

        let blocked = rl.check_status_at("A", t0() + Duration::days(6)).await.unwrap();
        assert!(!blocked.can_question);

        // Exactly seven days after the oldest event it no longer counts.
        let reopened = rl.check_status_at("A", t0() + Duration::days(7)).await.unwrap();
        assert!(reopened.can_question);
        assert_eq!(reopened.questions_used, 1);
    }

    #[tokio::test]
    async fn test_uploads_counted_separately() {
        let rl = limiter(5, 1);
        let details = ActionDetails::default().with_document("doc-1").with_response_time(40);
        let event = rl
            .record_action_at("A", ActionType::Upload, details, t0())
            .await
            .unwrap();
        assert_eq!(event.document_id.as_deref(), Some("doc-1"));

        let status = rl.check_status_at("A", t0()).await.unwrap();
        assert!(!status.can_upload);
        assert!(status.can_question);
        assert!(matches!(
            status.ensure(ActionType::Upload),
            Err(Error::RateLimitExceeded { used: 1, limit: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_check_and_record_is_strict() {
        let rl = limiter(3, 1);
        for _ in 0..3 {
            let admission = rl
                .check_and_record_at("A", ActionType::Question, ActionDetails::default(), t0())
                .await
                .unwrap();
            assert!(matches!(admission, Admission::Recorded(_)));
        }
        match rl
            .check_and_record_at("A", ActionType::Question, ActionDetails::default(), t0())
            .await
            .unwrap()
        {
            Admission::Denied(status) => {
                assert_eq!(status.questions_used, 3);
                assert!(!status.can_question);
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_strict_admission_ignores_later_events() {
        let rl = limiter(1, 1);
        let later = t0() + Duration::days(2);
        rl.record_action_at("A", ActionType::Question, ActionDetails::default(), later)
            .await
            .unwrap();

        // The event after `now` is outside the window ending at `now`.
        let status = rl.check_status_at("A", t0()).await.unwrap();
        assert!(status.can_question);
        let admission = rl
            .check_and_record_at("A", ActionType::Question, ActionDetails::default(), t0())
            .await
            .unwrap();
        assert!(matches!(admission, Admission::Recorded(_)));

        match rl
            .check_and_record_at("A", ActionType::Question, ActionDetails::default(), t0())
            .await
            .unwrap()
        {
            Admission::Denied(status) => assert!(!status.can_question),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_strict_admissions_never_overshoot() {
        let rl = Arc::new(limiter(4, 1));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let rl = Arc::clone(&rl);
            handles.push(tokio::spawn(async move {
                rl.check_and_record_at("A", ActionType::Question, ActionDetails::default(), t0())
                    .await
                    .unwrap()
            }));
        }
        let mut recorded = 0;
        for h in handles {
            if matches!(h.await.unwrap(), Admission::Recorded(_)) {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 4);
    }

    #[tokio::test]
    async fn test_blank_address_rejected() {
        let rl = limiter(1, 1);
        assert!(matches!(
            rl.check_status_at(" ", t0()).await,
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_non_positive_window_rejected() {
        let limits = QuotaLimits {
            window: Duration::zero(),
            ..QuotaLimits::default()
        };
        assert!(RateLimiter::new(Arc::new(InMemoryStore::new()), limits).is_err());
    }
}
