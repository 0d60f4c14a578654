// Rate-limit service - core business logic for per-action throttling.
//
// This service handles:
// - Layered checks per action (cooldown, rolling windows, concurrent cap,
//   account age), all ANDed together
// - Cost-weighted budgets over a fixed window
// - Auditing denials and escalating repeated denials as abuse
//
// `check` never writes. Callers `record` the event once the action has
// actually completed, so speculative checks cost nothing.

use super::rate_limit_models::{
    ActionLimit, Denial, RateLimitConfig, RateLimitDecision, RateLimitEvent, RateLimitTable,
};
use crate::core::audit::{event_types, AuditService, Severity};
use crate::core::collaborators::AccountDirectory;
use crate::core::context::RequestContext;
use crate::core::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Invalid rate-limit request: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Append a completed action.
    async fn record_event(&self, event: &RateLimitEvent) -> Result<(), StoreError>;

    /// Timestamps of a subject's events for an action at or after `since`,
    /// oldest first.
    async fn event_times_since(
        &self,
        subject_key: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;

    async fn last_event(
        &self,
        subject_key: &str,
        action: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn active_resources(&self, subject_key: &str, action: &str) -> Result<u32, StoreError>;

    /// Add `delta` to the held-resource count (never below zero) and return
    /// the new count.
    async fn adjust_active_resources(
        &self,
        subject_key: &str,
        action: &str,
        delta: i32,
    ) -> Result<u32, StoreError>;

    /// Atomically add `cost` to the subject's spend in the window starting at
    /// `window_start`, but only if the total stays within `budget`.
    async fn try_consume(
        &self,
        subject_key: &str,
        window_start: DateTime<Utc>,
        cost: u32,
        budget: u32,
    ) -> Result<bool, StoreError>;

    /// Drop events and spend windows older than `older_than`.
    async fn purge_events(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct RateLimitService<S: RateLimitStore> {
    store: S,
    table: RateLimitTable,
    config: RateLimitConfig,
    audit: Option<Arc<AuditService>>,
    accounts: Option<Arc<dyn AccountDirectory>>,
}

/// Keep the longest of the waits seen so far.
fn longest(current: Option<Duration>, wait: Duration) -> Option<Duration> {
    Some(current.map_or(wait, |c| c.max(wait)))
}

impl<S: RateLimitStore> RateLimitService<S> {
    pub fn new(store: S, table: RateLimitTable) -> Self {
        Self {
            store,
            table,
            config: RateLimitConfig::default(),
            audit: None,
            accounts: None,
        }
    }

    pub fn with_config(mut self, config: RateLimitConfig) -> Self {
        self.config = config;
        self
    }

    /// Audit denials (and escalate repeated ones) through this service.
    pub fn with_audit(mut self, audit: Arc<AuditService>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Enable account-age gating.
    pub fn with_accounts(mut self, accounts: Arc<dyn AccountDirectory>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn table(&self) -> &RateLimitTable {
        &self.table
    }

    fn resolve(
        &self,
        ctx: &RequestContext,
        action: &str,
    ) -> Result<(&ActionLimit, String), RateLimitError> {
        let limit = self
            .table
            .get(action)
            .ok_or_else(|| RateLimitError::Validation(format!("unknown action: {}", action)))?;
        let key = ctx.subject_key(limit.key_scope).ok_or_else(|| {
            RateLimitError::Validation(format!(
                "action {} is keyed by {} but the request has none",
                action,
                limit.key_scope.as_str()
            ))
        })?;
        Ok((limit, key))
    }

    /// Check whether `action` may happen at `now`. Has no side effects.
    ///
    /// If the store cannot be read the action is allowed with a warning,
    /// unless the action is marked `fail_closed`, in which case it is denied.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let (limit, key) = self.resolve(ctx, action)?;

        match self.evaluate(ctx, action, limit, &key, now).await {
            Ok(decision) => {
                if !decision.allowed {
                    tracing::debug!(
                        action,
                        subject_key = %key,
                        denials = ?decision.denials,
                        "Rate limit denied"
                    );
                }
                Ok(decision)
            }
            Err(e) if limit.fail_closed => {
                tracing::warn!(
                    action,
                    subject_key = %key,
                    "Rate-limit store unavailable, failing closed: {}",
                    e
                );
                Ok(RateLimitDecision::deny(vec![Denial::StoreUnavailable], None))
            }
            Err(e) => {
                tracing::warn!(
                    action,
                    subject_key = %key,
                    "Rate-limit store unavailable, failing open: {}",
                    e
                );
                Ok(RateLimitDecision::allow())
            }
        }
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        action: &str,
        limit: &ActionLimit,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, StoreError> {
        let mut denials = Vec::new();
        let mut retry_after = None;

        // 1. Cooldown since the last event
        if limit.cooldown_secs > 0 {
            if let Some(last) = self.store.last_event(key, action).await? {
                let ready_at = last + limit.cooldown();
                if now < ready_at {
                    denials.push(Denial::Cooldown {
                        cooldown_secs: limit.cooldown_secs,
                    });
                    retry_after = longest(retry_after, ready_at - now);
                }
            }
        }

        // 2. Rolling windows, fetched once at the widest span
        if let Some(widest) = limit.max_window() {
            let times = self
                .store
                .event_times_since(key, action, now - widest)
                .await?;

            for window in &limit.windows {
                let start = now - window.window();
                let in_window: Vec<DateTime<Utc>> = times
                    .iter()
                    .copied()
                    .filter(|t| *t > start && *t <= now)
                    .collect();
                let count = in_window.len();
                let max = window.max_count as usize;

                if count >= max {
                    denials.push(Denial::Window {
                        window_secs: window.window_secs,
                        max_count: window.max_count,
                        count: count as u32,
                    });
                    // Once this event leaves the window the count drops below max.
                    if max > 0 {
                        let frees_at = in_window[count - max] + window.window();
                        retry_after = longest(retry_after, frees_at - now);
                    }
                }
            }
        }

        // 3. Resources held right now
        if let Some(max_concurrent) = limit.max_concurrent {
            let active = self.store.active_resources(key, action).await?;
            if active >= max_concurrent {
                denials.push(Denial::Concurrent {
                    max_concurrent,
                    active,
                });
            }
        }

        // 4. Account age
        if let (Some(min_age), Some(accounts)) = (limit.min_account_age_secs, &self.accounts) {
            let old_enough_at = accounts
                .created_at(&ctx.subject_id)
                .await?
                .map(|created| created + Duration::seconds(min_age as i64));

            match old_enough_at {
                Some(at) if now >= at => {}
                Some(at) => {
                    denials.push(Denial::AccountTooNew {
                        min_account_age_secs: min_age,
                    });
                    retry_after = longest(retry_after, at - now);
                }
                None => denials.push(Denial::AccountTooNew {
                    min_account_age_secs: min_age,
                }),
            }
        }

        if denials.is_empty() {
            Ok(RateLimitDecision::allow())
        } else {
            Ok(RateLimitDecision::deny(denials, retry_after))
        }
    }

    /// Log a completed action. Call this only after the action succeeded.
    pub async fn record(
        &self,
        ctx: &RequestContext,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimitError> {
        let (_, key) = self.resolve(ctx, action)?;
        self.store
            .record_event(&RateLimitEvent {
                subject_key: key,
                action: action.to_string(),
                timestamp: now,
            })
            .await?;
        Ok(())
    }

    /// `check`, plus an audit trail for denials. Every
    /// `abuse_denials_per_hour`-th denial within an hour is written as an
    /// error-level abuse event, which the ban engine evaluates.
    pub async fn guard(
        &self,
        ctx: &RequestContext,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let decision = self.check(ctx, action, now).await?;
        if !decision.allowed {
            self.report_denial(ctx, action, &decision, now).await;
        }
        Ok(decision)
    }

    async fn report_denial(
        &self,
        ctx: &RequestContext,
        action: &str,
        decision: &RateLimitDecision,
        now: DateTime<Utc>,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let subject_id = ctx.subject_id.as_str();

        let details = json!({
            "action": action,
            "denials": decision.denials,
            "retry_after_secs": decision.retry_after.map(|d| d.num_seconds()),
        });
        if let Err(e) = audit
            .log(ctx, subject_id, event_types::RATE_LIMIT_DENIED, Severity::Warning, details)
            .await
        {
            tracing::warn!(action, subject_id, "Failed to audit rate-limit denial: {}", e);
            return;
        }

        let threshold = self.config.abuse_denials_per_hour;
        if threshold == 0 {
            return;
        }

        let denials = match audit
            .count_recent(subject_id, event_types::RATE_LIMIT_DENIED, now - Duration::hours(1))
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(subject_id, "Failed to count rate-limit denials: {}", e);
                return;
            }
        };

        if denials >= threshold && denials % threshold == 0 {
            tracing::warn!(action, subject_id, denials, "Repeated rate-limit denials");
            let details = json!({ "action": action, "denials_last_hour": denials });
            if let Err(e) = audit
                .log(ctx, subject_id, event_types::RATE_LIMIT_ABUSE, Severity::Error, details)
                .await
            {
                tracing::warn!(subject_id, "Failed to audit rate-limit abuse: {}", e);
            }
        }
    }

    /// Spend `cost` from a `budget` that refills every fixed window.
    ///
    /// Returns `true` and consumes the cost when it fits. Store failures
    /// allow the operation.
    pub async fn check_weighted(
        &self,
        subject_key: &str,
        cost: u32,
        budget: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, RateLimitError> {
        if subject_key.trim().is_empty() {
            return Err(RateLimitError::Validation("subject key is empty".to_string()));
        }
        if cost == 0 {
            return Ok(true);
        }
        if cost > budget {
            tracing::debug!(subject_key, cost, budget, "Operation cost exceeds whole budget");
            return Ok(false);
        }

        let window_secs = self.config.weighted_window_secs.max(1) as i64;
        let start_secs = now.timestamp().div_euclid(window_secs) * window_secs;
        let window_start = DateTime::from_timestamp(start_secs, 0).unwrap_or(now);

        match self
            .store
            .try_consume(subject_key, window_start, cost, budget)
            .await
        {
            Ok(allowed) => Ok(allowed),
            Err(e) => {
                tracing::warn!(subject_key, "Weighted budget store unavailable, failing open: {}", e);
                Ok(true)
            }
        }
    }

    /// Mark one more concurrent resource (e.g. an open room) as held.
    pub async fn acquire_resource(
        &self,
        ctx: &RequestContext,
        action: &str,
    ) -> Result<u32, RateLimitError> {
        let (_, key) = self.resolve(ctx, action)?;
        Ok(self.store.adjust_active_resources(&key, action, 1).await?)
    }

    pub async fn release_resource(
        &self,
        ctx: &RequestContext,
        action: &str,
    ) -> Result<u32, RateLimitError> {
        let (_, key) = self.resolve(ctx, action)?;
        Ok(self.store.adjust_active_resources(&key, action, -1).await?)
    }

    /// Apply event retention. Returns the number of rows removed.
    pub async fn purge_events(&self, now: DateTime<Utc>) -> Result<u64, RateLimitError> {
        let purged = self
            .store
            .purge_events(now - self.config.event_retention)
            .await?;
        if purged > 0 {
            tracing::info!(purged, "Purged old rate-limit events");
        }
        Ok(purged)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::context::KeyScope;
    use crate::core::rate_limit::{ActionLimit, WindowLimit};
    use crate::infra::audit::InMemoryAuditStore;
    use crate::infra::rate_limit::InMemoryRateLimitStore;
    use chrono::TimeZone;
    use std::io::Write;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    fn table_with(action: &str, limit: ActionLimit) -> RateLimitTable {
        let mut table = RateLimitTable::empty();
        table.insert(action, limit);
        table
    }

    /// Every call fails, like an unreachable database.
    struct UnavailableStore;

    #[async_trait]
    impl RateLimitStore for UnavailableStore {
        async fn record_event(&self, _event: &RateLimitEvent) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn event_times_since(
            &self,
            _subject_key: &str,
            _action: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<DateTime<Utc>>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn last_event(
            &self,
            _subject_key: &str,
            _action: &str,
        ) -> Result<Option<DateTime<Utc>>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn active_resources(&self, _subject_key: &str, _action: &str) -> Result<u32, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn adjust_active_resources(
            &self,
            _subject_key: &str,
            _action: &str,
            _delta: i32,
        ) -> Result<u32, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn try_consume(
            &self,
            _subject_key: &str,
            _window_start: DateTime<Utc>,
            _cost: u32,
            _budget: u32,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn purge_events(&self, _older_than: DateTime<Utc>) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    struct FixedAccounts(Option<DateTime<Utc>>);

    #[async_trait]
    impl AccountDirectory for FixedAccounts {
        async fn created_at(&self, _subject_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_nth_event_allowed_next_denied() {
        let limit = ActionLimit {
            windows: vec![WindowLimit::new(3600, 3)],
            ..Default::default()
        };
        let service = RateLimitService::new(InMemoryRateLimitStore::new(), table_with("follow", limit));
        let ctx = RequestContext::new("user-1");
        let t0 = start();

        for i in 0..3 {
            let now = t0 + Duration::minutes(i);
            let decision = service.check(&ctx, "follow", now).await.unwrap();
            assert!(decision.allowed, "event {} should be allowed", i + 1);
            service.record(&ctx, "follow", now).await.unwrap();
        }

        let now = t0 + Duration::minutes(10);
        let decision = service.check(&ctx, "follow", now).await.unwrap();
        assert!(!decision.allowed);
        // The first event leaves the window at t0 + 1h.
        assert_eq!(decision.retry_after, Some(Duration::minutes(50)));

        let later = t0 + Duration::hours(1);
        assert!(service.check(&ctx, "follow", later).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_cooldown_denies_regardless_of_window() {
        let limit = ActionLimit {
            cooldown_secs: 30,
            windows: vec![WindowLimit::new(86_400, 1_000)],
            ..Default::default()
        };
        let service =
            RateLimitService::new(InMemoryRateLimitStore::new(), table_with("schedule_post", limit));
        let ctx = RequestContext::new("user-1");
        let t0 = start();

        service.record(&ctx, "schedule_post", t0).await.unwrap();

        let decision = service
            .check(&ctx, "schedule_post", t0 + Duration::seconds(29))
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.denials, vec![Denial::Cooldown { cooldown_secs: 30 }]);
        assert_eq!(decision.retry_after, Some(Duration::seconds(1)));

        let decision = service
            .check(&ctx, "schedule_post", t0 + Duration::seconds(30))
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_check_has_no_side_effects() {
        let limit = ActionLimit {
            windows: vec![WindowLimit::new(60, 1)],
            ..Default::default()
        };
        let service =
            RateLimitService::new(InMemoryRateLimitStore::new(), table_with("execute_query", limit));
        let ctx = RequestContext::new("user-1");

        for _ in 0..10 {
            assert!(service.check(&ctx, "execute_query", start()).await.unwrap().allowed);
        }
    }

    #[tokio::test]
    async fn test_all_windows_must_pass() {
        let limit = ActionLimit {
            windows: vec![WindowLimit::new(3600, 5), WindowLimit::new(86_400, 6)],
            ..Default::default()
        };
        let service = RateLimitService::new(InMemoryRateLimitStore::new(), table_with("follow", limit));
        let ctx = RequestContext::new("user-1");
        let t0 = start();

        for i in 0..6 {
            service
                .record(&ctx, "follow", t0 + Duration::minutes(i * 20))
                .await
                .unwrap();
        }

        // Hourly window has room again, the daily one does not.
        let now = t0 + Duration::hours(3);
        let decision = service.check(&ctx, "follow", now).await.unwrap();
        assert!(!decision.allowed);
        assert!(matches!(
            decision.denials.as_slice(),
            [Denial::Window { window_secs: 86_400, .. }]
        ));
    }

    #[tokio::test]
    async fn test_concurrent_resource_cap() {
        let limit = ActionLimit {
            max_concurrent: Some(1),
            ..Default::default()
        };
        let service =
            RateLimitService::new(InMemoryRateLimitStore::new(), table_with("create_room", limit));
        let ctx = RequestContext::new("user-1");

        assert!(service.check(&ctx, "create_room", start()).await.unwrap().allowed);
        service.acquire_resource(&ctx, "create_room").await.unwrap();

        let decision = service.check(&ctx, "create_room", start()).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, None);

        assert_eq!(service.release_resource(&ctx, "create_room").await.unwrap(), 0);
        assert_eq!(service.release_resource(&ctx, "create_room").await.unwrap(), 0);
        assert!(service.check(&ctx, "create_room", start()).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open_for_ordinary_actions() {
        let service = RateLimitService::new(UnavailableStore, RateLimitTable::default());
        let ctx = RequestContext::new("user-1");

        let decision = service.check(&ctx, "follow", start()).await.unwrap();
        assert!(decision.allowed);
        assert!(service.check_weighted("subject:user-1", 5, 10, start()).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed_for_signup() {
        let service = RateLimitService::new(UnavailableStore, RateLimitTable::default());
        let ctx = RequestContext::new("anonymous").with_ip("203.0.113.9");

        let decision = service.check(&ctx, "signup", start()).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.denials, vec![Denial::StoreUnavailable]);
    }

    #[tokio::test]
    async fn test_signup_is_keyed_by_ip() {
        let service = RateLimitService::new(InMemoryRateLimitStore::new(), RateLimitTable::default());

        let no_ip = RequestContext::new("anonymous");
        assert!(matches!(
            service.check(&no_ip, "signup", start()).await,
            Err(RateLimitError::Validation(_))
        ));

        // Different subjects behind one IP share the limit.
        let first = RequestContext::new("a").with_ip("198.51.100.7");
        let second = RequestContext::new("b").with_ip("198.51.100.7");
        service.record(&first, "signup", start()).await.unwrap();
        let decision = service
            .check(&second, "signup", start() + Duration::seconds(10))
            .await
            .unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let service = RateLimitService::new(InMemoryRateLimitStore::new(), RateLimitTable::default());
        let result = service
            .check(&RequestContext::new("user-1"), "teleport", start())
            .await;
        assert!(matches!(result, Err(RateLimitError::Validation(_))));
    }

    #[tokio::test]
    async fn test_account_age_gate() {
        let limit = ActionLimit {
            key_scope: KeyScope::Subject,
            min_account_age_secs: Some(86_400),
            ..Default::default()
        };
        let ctx = RequestContext::new("user-1");

        let young = RateLimitService::new(
            InMemoryRateLimitStore::new(),
            table_with("create_community", limit.clone()),
        )
        .with_accounts(Arc::new(FixedAccounts(Some(start() - Duration::hours(6)))));
        let decision = young.check(&ctx, "create_community", start()).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::hours(18)));

        let old = RateLimitService::new(
            InMemoryRateLimitStore::new(),
            table_with("create_community", limit.clone()),
        )
        .with_accounts(Arc::new(FixedAccounts(Some(start() - Duration::days(3)))));
        assert!(old.check(&ctx, "create_community", start()).await.unwrap().allowed);

        let unknown = RateLimitService::new(
            InMemoryRateLimitStore::new(),
            table_with("create_community", limit),
        )
        .with_accounts(Arc::new(FixedAccounts(None)));
        assert!(!unknown.check(&ctx, "create_community", start()).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_weighted_budget_per_fixed_window() {
        let service = RateLimitService::new(InMemoryRateLimitStore::new(), RateLimitTable::default());
        let t0 = start();

        assert!(service.check_weighted("query:user-1", 4, 10, t0).await.unwrap());
        assert!(service.check_weighted("query:user-1", 4, 10, t0 + Duration::seconds(5)).await.unwrap());
        assert!(!service.check_weighted("query:user-1", 4, 10, t0 + Duration::seconds(10)).await.unwrap());
        // A cheap operation still fits.
        assert!(service.check_weighted("query:user-1", 2, 10, t0 + Duration::seconds(11)).await.unwrap());

        // Next fixed window starts fresh.
        assert!(service.check_weighted("query:user-1", 4, 10, t0 + Duration::seconds(60)).await.unwrap());
        assert!(!service.check_weighted("query:user-1", 11, 10, t0 + Duration::seconds(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_guard_audits_denials_and_flags_abuse() {
        let clock = Arc::new(ManualClock::new(start()));
        let audit_store = Arc::new(InMemoryAuditStore::new());
        let audit = Arc::new(AuditService::new(audit_store.clone(), clock.clone()));
        let limit = ActionLimit {
            windows: vec![WindowLimit::new(3600, 1)],
            ..Default::default()
        };
        let service = RateLimitService::new(InMemoryRateLimitStore::new(), table_with("follow", limit))
            .with_audit(audit.clone());
        let ctx = RequestContext::new("user-1");

        service.record(&ctx, "follow", start()).await.unwrap();
        for _ in 0..10 {
            let decision = service.guard(&ctx, "follow", start()).await.unwrap();
            assert!(!decision.allowed);
        }

        let since = start() - Duration::hours(1);
        assert_eq!(
            audit.count_recent("user-1", event_types::RATE_LIMIT_DENIED, since).await.unwrap(),
            10
        );
        assert_eq!(
            audit.count_recent("user-1", event_types::RATE_LIMIT_ABUSE, since).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_purge_keeps_recent_events() {
        let service = RateLimitService::new(InMemoryRateLimitStore::new(), RateLimitTable::default());
        let ctx = RequestContext::new("user-1");
        service.record(&ctx, "follow", start()).await.unwrap();
        service
            .record(&ctx, "follow", start() + Duration::days(40))
            .await
            .unwrap();

        assert_eq!(service.purge_events(start() + Duration::days(45)).await.unwrap(), 1);
    }

    #[test]
    fn test_table_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "follow": {{ "cooldown_secs": 5, "windows": [{{ "window_secs": 60, "max_count": 2 }}] }} }}"#
        )
        .unwrap();

        let table = RateLimitTable::from_json_file(file.path()).unwrap();
        let follow = table.get("follow").unwrap();
        assert_eq!(follow.cooldown_secs, 5);
        assert_eq!(follow.windows, vec![WindowLimit::new(60, 2)]);
        // Untouched actions keep their defaults.
        assert!(table.get("signup").unwrap().fail_closed);
    }

    #[test]
    fn test_zero_length_window_rejected() {
        let json = r#"{ "follow": { "windows": [{ "window_secs": 0, "max_count": 2 }] } }"#;
        assert!(RateLimitTable::from_json_str(json).is_err());
    }
}
