// Ban escalation engine - core business logic for issuing and lifting bans.
//
// This service handles:
// - Automatic bans from the audit-event ladder (most severe rule first)
// - Manual bans and unbans by an issuer
// - Lazy expiry: reading ban state clears a lapsed temporary ban
//
// Evaluations for the same profile run one at a time behind a per-profile
// mutex, so two simultaneous threshold crossings produce one ban record.

use super::ban_models::{
    AutoBanOutcome, BanHistoryEntry, BanHistoryKind, BanPolicy, BanRecord, BanSweepSummary,
    LadderRule, NewBanHistory, UnbanOutcome,
};
use crate::core::audit::{
    event_types, AuditStore, NewAuditEvent, Severity, ViolationHandler, ViolationQuery,
};
use crate::core::clock::Clock;
use crate::core::collaborators::{Notice, Notifier};
use crate::core::context::RequestContext;
use crate::core::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum BanError {
    #[error("Invalid ban request: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait BanStore: Send + Sync {
    async fn get(&self, profile_id: &str) -> Result<Option<BanRecord>, StoreError>;

    /// Insert or replace the profile's ban record.
    async fn save(&self, record: &BanRecord) -> Result<(), StoreError>;

    async fn append_history(&self, entry: NewBanHistory) -> Result<BanHistoryEntry, StoreError>;

    /// Set `lifted_at` on every ban row of the profile that is still open.
    /// Returns how many rows were closed.
    async fn close_open_history(
        &self,
        profile_id: &str,
        lifted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// All history rows for a profile, oldest first.
    async fn history(&self, profile_id: &str) -> Result<Vec<BanHistoryEntry>, StoreError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct BanService {
    store: Arc<dyn BanStore>,
    audit: Arc<dyn AuditStore>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
    policy: BanPolicy,
    // Profile ID -> evaluation lock
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BanService {
    pub fn new(store: Arc<dyn BanStore>, audit: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            notifier: None,
            clock,
            policy: BanPolicy::default(),
            locks: DashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: BanPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn validate_profile(profile_id: &str) -> Result<(), BanError> {
        if profile_id.trim().is_empty() {
            Err(BanError::Validation("profile id is empty".to_string()))
        } else {
            Ok(())
        }
    }

    fn lock_for(&self, profile_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(profile_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop locks nobody is holding or waiting on.
    fn prune_locks(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Current ban record without side effects. A lapsed temporary ban is
    /// still reported as stored; use `BanRecord::is_active_at` to judge it.
    pub async fn ban_status(&self, profile_id: &str) -> Result<Option<BanRecord>, BanError> {
        Self::validate_profile(profile_id)?;
        Ok(self.store.get(profile_id).await?)
    }

    /// Whether the profile is banned right now.
    ///
    /// A temporary ban whose end has passed is cleared here and its history
    /// row closed, so nothing has to sweep expired bans.
    pub async fn is_banned(&self, profile_id: &str) -> Result<bool, BanError> {
        Self::validate_profile(profile_id)?;
        let now = self.clock.now();

        let record = match self.store.get(profile_id).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        if record.is_active_at(now) {
            return Ok(true);
        }

        if record.is_expired_at(now) {
            let lock = self.lock_for(profile_id);
            let _guard = lock.lock().await;
            self.expire_if_due(profile_id, now).await?;
        }

        Ok(false)
    }

    /// Clear a lapsed temporary ban. Caller must hold the profile lock.
    /// Returns the record as it stands afterwards.
    async fn expire_if_due(
        &self,
        profile_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BanRecord>, BanError> {
        let Some(mut record) = self.store.get(profile_id).await? else {
            return Ok(None);
        };

        if !record.is_expired_at(now) {
            return Ok(Some(record));
        }

        let expired_at = record.banned_until;
        record.is_banned = false;
        record.banned_until = None;
        self.store.save(&record).await?;
        self.store.close_open_history(profile_id, now).await?;

        tracing::info!(profile_id, "Temporary ban expired");
        self.record_audit(
            &RequestContext::system(),
            profile_id,
            event_types::BAN_EXPIRED,
            Severity::Info,
            json!({ "banned_until": expired_at }),
        )
        .await;

        Ok(Some(record))
    }

    /// Evaluate the ban ladder for a profile and ban it if a rule matches.
    ///
    /// An already-banned profile is left untouched and reported as
    /// `AlreadyBanned`; this is also what the loser of a concurrent race sees.
    pub async fn check_and_auto_ban(
        &self,
        ctx: &RequestContext,
        profile_id: &str,
        violation_type: &str,
    ) -> Result<AutoBanOutcome, BanError> {
        Self::validate_profile(profile_id)?;

        let lock = self.lock_for(profile_id);
        let _guard = lock.lock().await;
        let now = self.clock.now();

        if let Some(record) = self.expire_if_due(profile_id, now).await? {
            if record.is_active_at(now) {
                self.record_audit(
                    ctx,
                    profile_id,
                    event_types::BAN_SKIPPED,
                    Severity::Info,
                    json!({ "violation_type": violation_type, "reason": "already_banned" }),
                )
                .await;
                return Ok(AutoBanOutcome::AlreadyBanned);
            }
        }

        for rule in &self.policy.rules {
            let violations = self.count_for_rule(profile_id, rule, now).await?;
            if violations < rule.min_events {
                continue;
            }

            let reason = format!(
                "Automatic ban ({}): {} violations in {}h, latest {}",
                rule.name, violations, rule.window_hours, violation_type
            );
            let record = self
                .apply_ban(ctx, profile_id, None, &reason, rule.duration_hours, now)
                .await?;

            tracing::warn!(
                profile_id,
                rule = %rule.name,
                violations,
                until = ?record.banned_until,
                "Automatic ban issued"
            );
            return Ok(AutoBanOutcome::Banned {
                rule: rule.name.clone(),
                until: record.banned_until,
                violations,
            });
        }

        tracing::debug!(profile_id, violation_type, "No ban rule matched");
        Ok(AutoBanOutcome::NoAction)
    }

    async fn count_for_rule(
        &self,
        profile_id: &str,
        rule: &LadderRule,
        now: DateTime<Utc>,
    ) -> Result<u64, BanError> {
        let query = ViolationQuery {
            subject_id: profile_id,
            since: now - rule.window(),
            severities: &rule.severities,
            excluded_types: event_types::NON_COUNTING,
        };
        Ok(self.audit.count_violations(&query).await?)
    }

    /// Manually ban a profile, bypassing the ladder.
    ///
    /// `duration_hours: None` is a permanent ban. A ban already in force is
    /// replaced by this one.
    pub async fn ban(
        &self,
        ctx: &RequestContext,
        profile_id: &str,
        issuer_id: &str,
        reason: &str,
        duration_hours: Option<i64>,
    ) -> Result<BanRecord, BanError> {
        Self::validate_profile(profile_id)?;
        if issuer_id.trim().is_empty() {
            return Err(BanError::Validation("manual bans need an issuer".to_string()));
        }
        if reason.trim().is_empty() {
            return Err(BanError::Validation("ban reason is empty".to_string()));
        }
        if let Some(hours) = duration_hours {
            if hours <= 0 {
                return Err(BanError::Validation(format!(
                    "ban duration must be positive, got {}h",
                    hours
                )));
            }
        }

        if duration_hours.is_none() {
            // Callers cannot tell us whether "no duration" was deliberate.
            tracing::warn!(profile_id, issuer_id, "Manual ban without duration is permanent");
        }

        let lock = self.lock_for(profile_id);
        let _guard = lock.lock().await;
        let now = self.clock.now();

        self.expire_if_due(profile_id, now).await?;
        self.apply_ban(ctx, profile_id, Some(issuer_id), reason, duration_hours, now)
            .await
    }

    /// Lift a profile's ban. Lifting a profile that is not banned is a no-op
    /// that is still audited.
    pub async fn unban(
        &self,
        ctx: &RequestContext,
        profile_id: &str,
        issuer_id: &str,
        reason: Option<&str>,
    ) -> Result<UnbanOutcome, BanError> {
        Self::validate_profile(profile_id)?;
        if issuer_id.trim().is_empty() {
            return Err(BanError::Validation("unban needs an issuer".to_string()));
        }

        let lock = self.lock_for(profile_id);
        let _guard = lock.lock().await;
        let now = self.clock.now();
        let reason = reason.unwrap_or("Lifted by moderator").to_string();

        let record = self.expire_if_due(profile_id, now).await?;
        let Some(mut record) = record.filter(|r| r.is_active_at(now)) else {
            self.record_audit(
                ctx,
                profile_id,
                event_types::UNBAN_SKIPPED,
                Severity::Info,
                json!({ "issuer_id": issuer_id, "reason": reason }),
            )
            .await;
            return Ok(UnbanOutcome::NotBanned);
        };

        record.is_banned = false;
        record.banned_until = None;
        self.store.save(&record).await?;
        self.store.close_open_history(profile_id, now).await?;
        self.store
            .append_history(NewBanHistory {
                profile_id: profile_id.to_string(),
                kind: BanHistoryKind::Unban,
                reason: reason.clone(),
                duration_hours: None,
                issuer_id: Some(issuer_id.to_string()),
                created_at: now,
            })
            .await?;

        tracing::info!(profile_id, issuer_id, "Ban lifted");
        self.record_audit(
            ctx,
            profile_id,
            event_types::BAN_LIFTED,
            Severity::Info,
            json!({ "issuer_id": issuer_id, "reason": reason }),
        )
        .await;
        self.send_notice(Notice::BanLifted {
            profile_id: profile_id.to_string(),
        })
        .await;

        Ok(UnbanOutcome::Lifted)
    }

    /// Write the ban record and its history row. Caller holds the profile lock.
    async fn apply_ban(
        &self,
        ctx: &RequestContext,
        profile_id: &str,
        issuer_id: Option<&str>,
        reason: &str,
        duration_hours: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<BanRecord, BanError> {
        let mut record = self
            .store
            .get(profile_id)
            .await?
            .unwrap_or_else(|| BanRecord::unbanned(profile_id));
        let superseded = record.is_active_at(now);

        record.is_banned = true;
        record.banned_at = Some(now);
        record.banned_until = duration_hours.map(|h| now + Duration::hours(h));
        record.reason = Some(reason.to_string());
        record.ban_count += 1;

        self.store.save(&record).await?;
        if superseded {
            self.store.close_open_history(profile_id, now).await?;
        }
        self.store
            .append_history(NewBanHistory {
                profile_id: profile_id.to_string(),
                kind: BanHistoryKind::for_duration(duration_hours),
                reason: reason.to_string(),
                duration_hours,
                issuer_id: issuer_id.map(str::to_string),
                created_at: now,
            })
            .await?;

        self.record_audit(
            ctx,
            profile_id,
            event_types::BAN_ISSUED,
            Severity::Warning,
            json!({
                "issuer_id": issuer_id,
                "reason": reason,
                "duration_hours": duration_hours,
                "banned_until": record.banned_until,
                "ban_count": record.ban_count,
                "superseded": superseded,
                "duration_unspecified": issuer_id.is_some() && duration_hours.is_none(),
            }),
        )
        .await;
        self.send_notice(Notice::BanIssued {
            profile_id: profile_id.to_string(),
            until: record.banned_until,
            reason: reason.to_string(),
        })
        .await;

        Ok(record)
    }

    pub async fn history(&self, profile_id: &str) -> Result<Vec<BanHistoryEntry>, BanError> {
        Self::validate_profile(profile_id)?;
        Ok(self.store.history(profile_id).await?)
    }

    /// Re-evaluate every profile with recent violations. Safe to re-run: a
    /// profile banned by an earlier pass reports `AlreadyBanned`.
    pub async fn auto_ban_sweep(&self, limit: usize) -> Result<BanSweepSummary, BanError> {
        let now = self.clock.now();
        let severities = [Severity::Error, Severity::Critical];
        let subjects = self
            .audit
            .subjects_with_violations(
                now - self.policy.max_window(),
                &severities,
                event_types::NON_COUNTING,
                limit,
            )
            .await?;

        let ctx = RequestContext::system();
        let mut summary = BanSweepSummary::default();
        for profile_id in subjects {
            summary.evaluated += 1;
            match self.check_and_auto_ban(&ctx, &profile_id, "sweep").await {
                Ok(AutoBanOutcome::Banned { .. }) => summary.banned += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(profile_id = %profile_id, "Ban sweep evaluation failed: {}", e);
                }
            }
        }

        self.prune_locks();
        tracing::info!(
            evaluated = summary.evaluated,
            banned = summary.banned,
            errors = summary.errors,
            "Ban sweep finished"
        );
        Ok(summary)
    }

    /// Audit writes never undo a decision that is already stored; a failure is
    /// logged loudly instead.
    async fn record_audit(
        &self,
        ctx: &RequestContext,
        profile_id: &str,
        event_type: &str,
        severity: Severity,
        details: serde_json::Value,
    ) {
        let event = NewAuditEvent {
            subject_id: profile_id.to_string(),
            event_type: event_type.to_string(),
            severity,
            details,
            ip: ctx.ip.clone(),
            created_at: self.clock.now(),
        };
        if let Err(e) = self.audit.append(event).await {
            tracing::error!(profile_id, event_type, "Failed to write ban audit event: {}", e);
        }
    }

    async fn send_notice(&self, notice: Notice) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(notice).await {
                tracing::warn!("Failed to dispatch ban notice: {}", e);
            }
        }
    }
}

#[async_trait]
impl ViolationHandler for BanService {
    async fn on_violation(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        violation_type: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.check_and_auto_ban(ctx, subject_id, violation_type)
            .await
            .map(|_| ())
            .map_err(|e| e.into())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::infra::audit::InMemoryAuditStore;
    use crate::infra::ban::InMemoryBanStore;
    use chrono::TimeZone;

    struct Harness {
        service: Arc<BanService>,
        bans: Arc<InMemoryBanStore>,
        audit: Arc<InMemoryAuditStore>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap(),
        ));
        let bans = Arc::new(InMemoryBanStore::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let service = Arc::new(BanService::new(bans.clone(), audit.clone(), clock.clone()));
        Harness {
            service,
            bans,
            audit,
            clock,
        }
    }

    async fn seed(
        audit: &InMemoryAuditStore,
        profile_id: &str,
        count: usize,
        event_type: &str,
        severity: Severity,
        at: DateTime<Utc>,
    ) {
        for _ in 0..count {
            audit
                .append(NewAuditEvent {
                    subject_id: profile_id.to_string(),
                    event_type: event_type.to_string(),
                    severity,
                    details: json!({}),
                    ip: None,
                    created_at: at,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_ten_daily_violations_ban_for_a_day() {
        let h = harness();
        let ctx = RequestContext::system();
        let now = h.clock.now();

        seed(&h.audit, "p1", 9, "spam", Severity::Error, now - Duration::hours(2)).await;
        let outcome = h.service.check_and_auto_ban(&ctx, "p1", "spam").await.unwrap();
        assert_eq!(outcome, AutoBanOutcome::NoAction);
        assert!(!h.service.is_banned("p1").await.unwrap());

        seed(&h.audit, "p1", 1, "spam", Severity::Error, now).await;
        let outcome = h.service.check_and_auto_ban(&ctx, "p1", "spam").await.unwrap();
        assert_eq!(
            outcome,
            AutoBanOutcome::Banned {
                rule: "daily_violations".to_string(),
                until: Some(now + Duration::hours(24)),
                violations: 10,
            }
        );
        assert!(h.service.is_banned("p1").await.unwrap());

        // Still banned one second before the end.
        h.clock.advance(Duration::hours(24) - Duration::seconds(1));
        assert!(h.service.is_banned("p1").await.unwrap());

        // Expires on its own, no unban call.
        h.clock.advance(Duration::seconds(1));
        assert!(!h.service.is_banned("p1").await.unwrap());

        let record = h.bans.get("p1").await.unwrap().unwrap();
        assert!(!record.is_banned);
        assert_eq!(record.ban_count, 1);

        let history = h.service.history("p1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, BanHistoryKind::TemporaryBan);
        assert_eq!(history[0].issuer_id, None);
        assert_eq!(history[0].lifted_at, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn test_tenth_logged_violation_bans_through_audit_trail() {
        use crate::core::audit::AuditService;

        let h = harness();
        let audit_service = AuditService::new(h.audit.clone(), h.clock.clone())
            .with_violation_handler(h.service.clone());
        let ctx = RequestContext::system();
        let start = h.clock.now();

        for _ in 0..9 {
            audit_service
                .log(&ctx, "p12", "spam_detected", Severity::Error, json!({}))
                .await
                .unwrap();
            h.clock.advance(Duration::minutes(1));
        }
        assert!(!h.service.is_banned("p12").await.unwrap());

        let now = h.clock.now();
        audit_service
            .log(&ctx, "p12", "spam_detected", Severity::Error, json!({}))
            .await
            .unwrap();

        assert!(h.service.is_banned("p12").await.unwrap());
        let record = h.service.ban_status("p12").await.unwrap().unwrap();
        assert_eq!(record.banned_until, Some(now + Duration::hours(24)));
        assert_eq!(record.ban_count, 1);
        assert!(now - start < Duration::hours(24));

        let history = h.service.history("p12").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, BanHistoryKind::TemporaryBan);
    }

    #[tokio::test]
    async fn test_weekly_hundred_outranks_daily_rule() {
        let h = harness();
        let now = h.clock.now();

        seed(&h.audit, "p2", 98, "abuse", Severity::Error, now - Duration::days(3)).await;
        seed(&h.audit, "p2", 3, "abuse", Severity::Critical, now - Duration::hours(1)).await;

        let outcome = h
            .service
            .check_and_auto_ban(&RequestContext::system(), "p2", "abuse")
            .await
            .unwrap();

        match outcome {
            AutoBanOutcome::Banned { rule, until, violations } => {
                assert_eq!(rule, "weekly_critical");
                assert_eq!(until, None);
                assert_eq!(violations, 101);
            }
            other => panic!("expected permanent ban, got {:?}", other),
        }

        h.clock.advance(Duration::days(365));
        assert!(h.service.is_banned("p2").await.unwrap());
    }

    #[tokio::test]
    async fn test_weekly_fifty_bans_for_a_week() {
        let h = harness();
        let now = h.clock.now();
        seed(&h.audit, "p3", 50, "abuse", Severity::Error, now - Duration::days(5)).await;

        let outcome = h
            .service
            .check_and_auto_ban(&RequestContext::system(), "p3", "abuse")
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            AutoBanOutcome::Banned { ref rule, until: Some(until), .. }
                if rule == "weekly_severe" && until == now + Duration::hours(168)
        ));
    }

    #[tokio::test]
    async fn test_events_outside_window_are_ignored() {
        let h = harness();
        let now = h.clock.now();
        seed(&h.audit, "p4", 200, "abuse", Severity::Error, now - Duration::days(8)).await;
        seed(&h.audit, "p4", 40, "noise", Severity::Warning, now).await;

        let outcome = h
            .service
            .check_and_auto_ban(&RequestContext::system(), "p4", "abuse")
            .await
            .unwrap();
        assert_eq!(outcome, AutoBanOutcome::NoAction);
    }

    #[tokio::test]
    async fn test_ban_events_do_not_feed_the_ladder() {
        let h = harness();
        let now = h.clock.now();
        seed(&h.audit, "p5", 9, "spam", Severity::Error, now).await;
        seed(&h.audit, "p5", 20, event_types::BAN_ISSUED, Severity::Critical, now).await;
        seed(&h.audit, "p5", 20, event_types::FLAG_ESCALATED, Severity::Error, now).await;

        let outcome = h
            .service
            .check_and_auto_ban(&RequestContext::system(), "p5", "spam")
            .await
            .unwrap();
        assert_eq!(outcome, AutoBanOutcome::NoAction);
    }

    #[tokio::test]
    async fn test_already_banned_is_untouched() {
        let h = harness();
        let ctx = RequestContext::system();
        let now = h.clock.now();
        seed(&h.audit, "p6", 12, "spam", Severity::Error, now).await;

        assert!(h.service.check_and_auto_ban(&ctx, "p6", "spam").await.unwrap().is_banned());
        let outcome = h.service.check_and_auto_ban(&ctx, "p6", "spam").await.unwrap();
        assert_eq!(outcome, AutoBanOutcome::AlreadyBanned);

        let record = h.bans.get("p6").await.unwrap().unwrap();
        assert_eq!(record.ban_count, 1);
        assert_eq!(h.service.history("p6").await.unwrap().len(), 1);

        let skipped = h
            .audit
            .count_of_type("p6", event_types::BAN_SKIPPED, now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(skipped, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_evaluations_issue_one_ban() {
        let h = harness();
        let now = h.clock.now();
        seed(&h.audit, "p7", 10, "spam", Severity::Error, now).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = Arc::clone(&h.service);
            handles.push(tokio::spawn(async move {
                service
                    .check_and_auto_ban(&RequestContext::system(), "p7", "spam")
                    .await
                    .unwrap()
            }));
        }

        let mut banned = 0;
        let mut already = 0;
        for handle in handles {
            match handle.await.unwrap() {
                AutoBanOutcome::Banned { .. } => banned += 1,
                AutoBanOutcome::AlreadyBanned => already += 1,
                AutoBanOutcome::NoAction => panic!("threshold was met"),
            }
        }

        assert_eq!(banned, 1);
        assert_eq!(already, 7);
        assert_eq!(h.bans.get("p7").await.unwrap().unwrap().ban_count, 1);
        assert_eq!(h.service.history("p7").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_ban_and_unban_write_history() {
        let h = harness();
        let ctx = RequestContext::new("mod-1");

        let record = h
            .service
            .ban(&ctx, "p8", "mod-1", "harassment", Some(48))
            .await
            .unwrap();
        assert_eq!(record.banned_until, Some(h.clock.now() + Duration::hours(48)));
        assert!(h.service.is_banned("p8").await.unwrap());

        let outcome = h.service.unban(&ctx, "p8", "mod-1", None).await.unwrap();
        assert_eq!(outcome, UnbanOutcome::Lifted);
        assert!(!h.service.is_banned("p8").await.unwrap());

        let history = h.service.history("p8").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, BanHistoryKind::TemporaryBan);
        assert_eq!(history[0].issuer_id.as_deref(), Some("mod-1"));
        assert!(history[0].lifted_at.is_some());
        assert_eq!(history[1].kind, BanHistoryKind::Unban);
    }

    #[tokio::test]
    async fn test_manual_ban_without_duration_is_permanent() {
        let h = harness();
        let ctx = RequestContext::new("mod-1");

        let record = h.service.ban(&ctx, "p9", "mod-1", "fraud", None).await.unwrap();
        assert_eq!(record.banned_until, None);

        h.clock.advance(Duration::days(1000));
        assert!(h.service.is_banned("p9").await.unwrap());
        assert_eq!(
            h.service.history("p9").await.unwrap()[0].kind,
            BanHistoryKind::PermanentBan
        );
    }

    #[tokio::test]
    async fn test_manual_ban_validation() {
        let h = harness();
        let ctx = RequestContext::new("mod-1");

        assert!(matches!(
            h.service.ban(&ctx, "p10", "", "reason", Some(1)).await,
            Err(BanError::Validation(_))
        ));
        assert!(matches!(
            h.service.ban(&ctx, "p10", "mod-1", "reason", Some(0)).await,
            Err(BanError::Validation(_))
        ));
        assert!(h.bans.get("p10").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unban_when_not_banned_is_audited_noop() {
        let h = harness();
        let ctx = RequestContext::new("mod-1");

        let outcome = h.service.unban(&ctx, "p11", "mod-1", Some("appeal")).await.unwrap();
        assert_eq!(outcome, UnbanOutcome::NotBanned);
        assert!(h.service.history("p11").await.unwrap().is_empty());

        let skipped = h
            .audit
            .count_of_type("p11", event_types::UNBAN_SKIPPED, h.clock.now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_sweep_bans_offenders_once() {
        let h = harness();
        let now = h.clock.now();
        seed(&h.audit, "a", 10, "spam", Severity::Error, now).await;
        seed(&h.audit, "b", 2, "spam", Severity::Error, now).await;

        let first = h.service.auto_ban_sweep(100).await.unwrap();
        assert_eq!(
            first,
            BanSweepSummary {
                evaluated: 2,
                banned: 1,
                errors: 0
            }
        );

        let second = h.service.auto_ban_sweep(100).await.unwrap();
        assert_eq!(second.banned, 0);
        assert_eq!(h.bans.get("a").await.unwrap().unwrap().ban_count, 1);
    }
}
