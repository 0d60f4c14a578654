// Moderation workflow - flag creation, queue automation and visibility.
//
// This service handles:
// - Creating flags from the scanner, user reports and moderators (deduplicated)
// - Periodic scan batches over stale content
// - Queue automation: auto-resolve stale low-risk flags, escalate aged high-risk ones
// - Human review transitions (claim, resolve)
// - The read-only visibility decision for a piece of content
//
// Every automated state change is a conditional update in the store, so a
// flag is auto-resolved or escalated at most once per observed state even when
// two runs overlap.

use super::moderation_models::{
    priority_for_risk, FlagId, FlagSource, FlagState, HideReason, ModerationConfig,
    ModerationFlag, NewFlag, QueueAutomationSummary, ResolutionOutcome, ScanBatchSummary,
    VisibilityDecision, MAX_PRIORITY,
};
use crate::core::audit::{event_types, AuditService, Severity};
use crate::core::ban::BanStore;
use crate::core::clock::Clock;
use crate::core::collaborators::{ContentDirectory, ContentItem};
use crate::core::context::RequestContext;
use crate::core::scanner::{ContentRiskScanner, MAX_RISK};
use crate::core::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Invalid moderation request: {0}")]
    Validation(String),

    #[error("Flag {0} not found")]
    FlagNotFound(FlagId),

    #[error("Content {0} not found")]
    ContentNotFound(String),

    #[error("Flag {id} cannot change from state {state}")]
    InvalidTransition { id: FlagId, state: FlagState },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Insert `flag` unless a duplicate exists, atomically.
    ///
    /// A duplicate is a flag for the same content and source (and the same
    /// reporter when `flag.reporter_id` is set) that is still open, or that
    /// was created at or after `dedupe_since`. Returns the id of the new or
    /// existing flag and whether it was inserted.
    async fn insert_unless_duplicate(
        &self,
        flag: NewFlag,
        dedupe_since: Option<DateTime<Utc>>,
    ) -> Result<(FlagId, bool), StoreError>;

    async fn get(&self, id: FlagId) -> Result<Option<ModerationFlag>, StoreError>;

    /// Pending and in-review flags for one piece of content.
    async fn open_flags_for(&self, content_ref: &str) -> Result<Vec<ModerationFlag>, StoreError>;

    /// Pending flags with `risk < max_risk` created at or before
    /// `created_before`, oldest first (ties by id). Flags whose content has
    /// another open user report are left out before `limit` is applied.
    async fn auto_resolve_candidates(
        &self,
        max_risk: u8,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ModerationFlag>, StoreError>;

    /// Pending flags with `risk >= min_risk` and priority below the ceiling,
    /// created at or before `created_before`, oldest first (ties by id).
    async fn escalation_candidates(
        &self,
        min_risk: u8,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ModerationFlag>, StoreError>;

    /// Move a flag to `to` only if its current state is in `from`. Sets the
    /// reviewer and review time, and appends `note` when given.
    async fn transition(
        &self,
        id: FlagId,
        from: &[FlagState],
        to: FlagState,
        reviewer_id: Option<&str>,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Set the priority of a pending flag to `new`, only if it is still
    /// `expected`.
    async fn bump_priority(
        &self,
        id: FlagId,
        expected: u8,
        new: u8,
        note: &str,
    ) -> Result<bool, StoreError>;

    /// Open flags, highest priority first, then oldest.
    async fn review_queue(&self, limit: usize) -> Result<Vec<ModerationFlag>, StoreError>;

    /// Delete resolved flags reviewed before `before`.
    async fn purge_resolved(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ModerationService<F: FlagStore> {
    flags: F,
    content: Arc<dyn ContentDirectory>,
    bans: Arc<dyn BanStore>,
    scanner: ContentRiskScanner,
    audit: Arc<AuditService>,
    clock: Arc<dyn Clock>,
    config: ModerationConfig,
}

impl<F: FlagStore> ModerationService<F> {
    pub fn new(
        flags: F,
        content: Arc<dyn ContentDirectory>,
        bans: Arc<dyn BanStore>,
        scanner: ContentRiskScanner,
        audit: Arc<AuditService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            flags,
            content,
            bans,
            scanner,
            audit,
            clock,
            config: ModerationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ModerationConfig) -> Self {
        self.config = config;
        self
    }

    /// Raise a flag on a piece of content.
    ///
    /// Returns the id of the existing flag when this would duplicate one:
    /// scanner flags dedupe on content (open, or created within the staleness
    /// window), human flags dedupe on content and reporter while open.
    pub async fn create_flag(
        &self,
        ctx: &RequestContext,
        content_ref: &str,
        reasons: Vec<String>,
        risk: u8,
        source: FlagSource,
    ) -> Result<FlagId, ModerationError> {
        let (id, _) = self
            .create_flag_inner(ctx, content_ref, reasons, risk, source)
            .await?;
        Ok(id)
    }

    async fn create_flag_inner(
        &self,
        ctx: &RequestContext,
        content_ref: &str,
        reasons: Vec<String>,
        risk: u8,
        source: FlagSource,
    ) -> Result<(FlagId, bool), ModerationError> {
        if content_ref.trim().is_empty() {
            return Err(ModerationError::Validation("content ref is empty".to_string()));
        }
        if risk > MAX_RISK {
            return Err(ModerationError::Validation(format!(
                "risk {} is above {}",
                risk, MAX_RISK
            )));
        }
        if reasons.is_empty() {
            return Err(ModerationError::Validation("a flag needs at least one reason".to_string()));
        }

        let now = self.clock.now();
        let (reporter_id, dedupe_since) = if source.is_automated() {
            (None, Some(now - self.config.staleness))
        } else {
            if ctx.subject_id.trim().is_empty() {
                return Err(ModerationError::Validation("reporter id is empty".to_string()));
            }
            (Some(ctx.subject_id.clone()), None)
        };

        let new_flag = NewFlag {
            content_ref: content_ref.to_string(),
            reasons: reasons.clone(),
            risk,
            source,
            reporter_id,
            priority: priority_for_risk(risk),
            created_at: now,
        };
        let (id, inserted) = self
            .flags
            .insert_unless_duplicate(new_flag, dedupe_since)
            .await?;

        let details = json!({
            "flag_id": id,
            "content_ref": content_ref,
            "source": source.as_str(),
            "risk": risk,
            "reasons": reasons,
        });
        if inserted {
            tracing::info!(
                flag_id = id,
                content_ref,
                source = source.as_str(),
                risk,
                "Flag created"
            );
            self.record_audit(ctx, &ctx.subject_id, event_types::FLAG_CREATED, Severity::Info, details)
                .await;
        } else {
            tracing::debug!(flag_id = id, content_ref, "Duplicate flag suppressed");
            self.record_audit(
                ctx,
                &ctx.subject_id,
                event_types::FLAG_DEDUPLICATED,
                Severity::Info,
                details,
            )
            .await;
        }

        Ok((id, inserted))
    }

    /// A user reports content. One open report per reporter and content.
    pub async fn report_content(
        &self,
        ctx: &RequestContext,
        content_ref: &str,
        reason: &str,
    ) -> Result<FlagId, ModerationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ModerationError::Validation("report reason is empty".to_string()));
        }
        if self.content.get(content_ref).await?.is_none() {
            return Err(ModerationError::ContentNotFound(content_ref.to_string()));
        }

        self.create_flag(
            ctx,
            content_ref,
            vec![reason.to_string()],
            self.config.user_report_risk,
            FlagSource::UserReport,
        )
        .await
    }

    /// Scan up to `limit` items that were never scanned or were scanned longer
    /// ago than the staleness window, most recent first.
    ///
    /// A failing item is counted and skipped; it stays stale and is retried by
    /// the next batch.
    pub async fn scan_batch(&self, limit: usize) -> Result<ScanBatchSummary, ModerationError> {
        let now = self.clock.now();
        let candidates = self
            .content
            .scan_candidates(now - self.config.staleness, limit)
            .await?;

        let mut summary = ScanBatchSummary::default();
        for item in candidates {
            summary.scanned += 1;
            match self.scan_item(&item, now).await {
                Ok(true) => summary.flagged += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(content_ref = %item.content_ref, "Failed to scan content: {}", e);
                }
            }
        }

        tracing::info!(
            scanned = summary.scanned,
            flagged = summary.flagged,
            errors = summary.errors,
            "Scan batch finished"
        );
        Ok(summary)
    }

    /// Returns whether a new flag was created.
    async fn scan_item(&self, item: &ContentItem, now: DateTime<Utc>) -> Result<bool, ModerationError> {
        let verdict = self.scanner.scan(item).await;
        let mut created = false;

        if verdict.should_flag {
            let ctx = RequestContext::system();
            let (id, inserted) = self
                .create_flag_inner(
                    &ctx,
                    &item.content_ref,
                    verdict.reason_codes(),
                    verdict.risk,
                    FlagSource::Scanner,
                )
                .await?;
            created = inserted;

            // The author's violation record feeds the ban ladder.
            if let (true, Some(author_id)) = (inserted, item.author_id.as_deref()) {
                let severity = if verdict.hard_reject || verdict.risk >= self.config.hide_min_risk {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                self.record_audit(
                    &ctx,
                    author_id,
                    event_types::CONTENT_FLAGGED,
                    severity,
                    json!({
                        "flag_id": id,
                        "content_ref": item.content_ref,
                        "risk": verdict.risk,
                        "hard_reject": verdict.hard_reject,
                        "reasons": verdict.reason_codes(),
                    }),
                )
                .await;
            }
        }

        self.content.mark_checked(&item.content_ref, now).await?;
        Ok(created)
    }

    /// One pass of queue automation. Each half is capped at the configured
    /// batch size and works oldest-created first.
    pub async fn run_queue_automation(&self) -> Result<QueueAutomationSummary, ModerationError> {
        let now = self.clock.now();
        let ctx = RequestContext::system();
        let mut summary = QueueAutomationSummary::default();

        // Auto-resolve stale low-risk flags nobody else reported
        let stale = self
            .flags
            .auto_resolve_candidates(
                self.config.auto_resolve_max_risk,
                now - self.config.auto_resolve_min_age,
                self.config.automation_batch,
            )
            .await?;

        for flag in stale {
            summary.processed += 1;
            match self.try_auto_resolve(&ctx, &flag, now).await {
                Ok(true) => summary.auto_resolved += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(flag_id = flag.id, "Auto-resolve failed: {}", e);
                }
            }
        }

        // Escalate aged high-risk flags
        let urgent = self
            .flags
            .escalation_candidates(
                self.config.escalate_min_risk,
                now - self.config.escalate_min_age,
                self.config.automation_batch,
            )
            .await?;

        for flag in urgent {
            summary.processed += 1;
            match self.try_escalate(&ctx, &flag).await {
                Ok(true) => summary.escalated += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(flag_id = flag.id, "Escalation failed: {}", e);
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            auto_resolved = summary.auto_resolved,
            escalated = summary.escalated,
            errors = summary.errors,
            "Queue automation finished"
        );
        Ok(summary)
    }

    async fn try_auto_resolve(
        &self,
        ctx: &RequestContext,
        flag: &ModerationFlag,
        now: DateTime<Utc>,
    ) -> Result<bool, ModerationError> {
        let other_reports = self
            .flags
            .open_flags_for(&flag.content_ref)
            .await?
            .iter()
            .filter(|f| f.id != flag.id && f.source == FlagSource::UserReport)
            .count();
        if other_reports > 0 {
            self.record_skip(ctx, flag, "open_user_reports").await;
            return Ok(false);
        }

        let resolved = self
            .flags
            .transition(
                flag.id,
                &[FlagState::Pending],
                FlagState::Resolved,
                None,
                Some("auto-resolved: low risk, no open reports"),
                now,
            )
            .await?;

        if resolved {
            tracing::info!(flag_id = flag.id, content_ref = %flag.content_ref, "Flag auto-resolved");
            self.record_audit(
                ctx,
                &ctx.subject_id,
                event_types::FLAG_AUTO_RESOLVED,
                Severity::Info,
                json!({ "flag_id": flag.id, "content_ref": flag.content_ref, "risk": flag.risk }),
            )
            .await;
        } else {
            self.record_skip(ctx, flag, "state_changed").await;
        }
        Ok(resolved)
    }

    async fn try_escalate(&self, ctx: &RequestContext, flag: &ModerationFlag) -> Result<bool, ModerationError> {
        let new_priority = flag
            .priority
            .saturating_add(self.config.escalate_step)
            .min(MAX_PRIORITY);
        if new_priority <= flag.priority {
            self.record_skip(ctx, flag, "priority_at_ceiling").await;
            return Ok(false);
        }

        let note = format!("auto-escalated: priority {} -> {}", flag.priority, new_priority);
        let bumped = self
            .flags
            .bump_priority(flag.id, flag.priority, new_priority, &note)
            .await?;

        if bumped {
            tracing::info!(
                flag_id = flag.id,
                from = flag.priority,
                to = new_priority,
                "Flag escalated"
            );
            self.record_audit(
                ctx,
                &ctx.subject_id,
                event_types::FLAG_ESCALATED,
                Severity::Warning,
                json!({
                    "flag_id": flag.id,
                    "content_ref": flag.content_ref,
                    "from": flag.priority,
                    "to": new_priority,
                }),
            )
            .await;
        } else {
            self.record_skip(ctx, flag, "priority_changed").await;
        }
        Ok(bumped)
    }

    /// An automated decision that did not apply still leaves an audit row.
    async fn record_skip(&self, ctx: &RequestContext, flag: &ModerationFlag, reason: &str) {
        tracing::debug!(flag_id = flag.id, reason, "Queue automation skipped flag");
        self.record_audit(
            ctx,
            &ctx.subject_id,
            event_types::FLAG_AUTOMATION_SKIPPED,
            Severity::Info,
            json!({ "flag_id": flag.id, "content_ref": flag.content_ref, "reason": reason }),
        )
        .await;
    }

    /// A moderator takes a pending flag into review.
    pub async fn claim_flag(&self, ctx: &RequestContext, id: FlagId) -> Result<ModerationFlag, ModerationError> {
        let reviewer = Self::reviewer(ctx)?;
        let now = self.clock.now();

        let claimed = self
            .flags
            .transition(id, &[FlagState::Pending], FlagState::InReview, Some(reviewer), None, now)
            .await?;
        if !claimed {
            return Err(self.rejected_transition(id).await);
        }

        self.record_audit(
            ctx,
            reviewer,
            event_types::FLAG_CLAIMED,
            Severity::Info,
            json!({ "flag_id": id }),
        )
        .await;
        self.load(id).await
    }

    /// Close a pending or in-review flag. Confirmed violations are recorded
    /// against the content author, which feeds the ban ladder.
    pub async fn resolve_flag(
        &self,
        ctx: &RequestContext,
        id: FlagId,
        outcome: ResolutionOutcome,
        notes: Option<&str>,
    ) -> Result<ModerationFlag, ModerationError> {
        let reviewer = Self::reviewer(ctx)?;
        let now = self.clock.now();

        let note = match notes.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => format!("{}: {}", outcome.as_str(), n),
            None => outcome.as_str().to_string(),
        };
        let resolved = self
            .flags
            .transition(
                id,
                &[FlagState::Pending, FlagState::InReview],
                FlagState::Resolved,
                Some(reviewer),
                Some(&note),
                now,
            )
            .await?;
        if !resolved {
            return Err(self.rejected_transition(id).await);
        }

        let flag = self.load(id).await?;
        tracing::info!(flag_id = id, reviewer, outcome = outcome.as_str(), "Flag resolved");
        self.record_audit(
            ctx,
            reviewer,
            event_types::FLAG_RESOLVED,
            Severity::Info,
            json!({ "flag_id": id, "outcome": outcome.as_str() }),
        )
        .await;

        if outcome == ResolutionOutcome::ActionTaken {
            match self.content.get(&flag.content_ref).await {
                Ok(Some(ContentItem {
                    author_id: Some(author_id),
                    ..
                })) => {
                    self.record_audit(
                        ctx,
                        &author_id,
                        event_types::CONTENT_VIOLATION_CONFIRMED,
                        Severity::Error,
                        json!({ "flag_id": id, "content_ref": flag.content_ref, "reviewer_id": reviewer }),
                    )
                    .await;
                }
                Ok(_) => {
                    tracing::debug!(flag_id = id, "Resolved content has no known author");
                }
                Err(e) => {
                    tracing::warn!(flag_id = id, "Could not look up content author: {}", e);
                }
            }
        }

        Ok(flag)
    }

    pub async fn review_queue(&self, limit: usize) -> Result<Vec<ModerationFlag>, ModerationError> {
        Ok(self.flags.review_queue(limit).await?)
    }

    pub async fn get_flag(&self, id: FlagId) -> Result<ModerationFlag, ModerationError> {
        self.load(id).await
    }

    /// Should this content be hidden from other users? Reads only.
    ///
    /// Precedence: banned author, open high-risk flag, hidden or removed
    /// status, open user reports over the threshold.
    pub async fn filter_content(&self, content_ref: &str) -> Result<VisibilityDecision, ModerationError> {
        let item = self
            .content
            .get(content_ref)
            .await?
            .ok_or_else(|| ModerationError::ContentNotFound(content_ref.to_string()))?;
        let now = self.clock.now();

        if let Some(author_id) = item.author_id.as_deref() {
            if let Some(ban) = self.bans.get(author_id).await? {
                if ban.is_active_at(now) {
                    return Ok(VisibilityDecision::hidden(HideReason::AuthorBanned));
                }
            }
        }

        let open = self.flags.open_flags_for(content_ref).await?;
        if let Some(risk) = open.iter().map(|f| f.risk).max() {
            if risk >= self.config.hide_min_risk {
                return Ok(VisibilityDecision::hidden(HideReason::HighRiskFlag { risk }));
            }
        }

        if item.status.is_hard_hidden() {
            return Ok(VisibilityDecision::hidden(HideReason::ContentHidden));
        }

        let open_reports = open
            .iter()
            .filter(|f| f.source == FlagSource::UserReport)
            .count();
        if open_reports >= self.config.hide_min_open_reports {
            return Ok(VisibilityDecision::hidden(HideReason::ReportThreshold { open_reports }));
        }

        Ok(VisibilityDecision::visible())
    }

    /// Apply retention to resolved flags.
    pub async fn purge_resolved(&self) -> Result<u64, ModerationError> {
        let before = self.clock.now() - self.config.resolved_retention;
        let purged = self.flags.purge_resolved(before).await?;
        if purged > 0 {
            tracing::info!(purged, "Purged resolved flags");
        }
        Ok(purged)
    }

    fn reviewer(ctx: &RequestContext) -> Result<&str, ModerationError> {
        let reviewer = ctx.subject_id.trim();
        if reviewer.is_empty() {
            Err(ModerationError::Validation("reviewer id is empty".to_string()))
        } else {
            Ok(reviewer)
        }
    }

    async fn load(&self, id: FlagId) -> Result<ModerationFlag, ModerationError> {
        self.flags
            .get(id)
            .await?
            .ok_or(ModerationError::FlagNotFound(id))
    }

    /// Explain why a conditional transition did not apply.
    async fn rejected_transition(&self, id: FlagId) -> ModerationError {
        match self.flags.get(id).await {
            Ok(Some(flag)) => ModerationError::InvalidTransition {
                id,
                state: flag.state,
            },
            Ok(None) => ModerationError::FlagNotFound(id),
            Err(e) => ModerationError::Storage(e),
        }
    }

    /// A lost audit row is logged, never allowed to undo a stored decision.
    async fn record_audit(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        event_type: &str,
        severity: Severity,
        details: serde_json::Value,
    ) {
        if let Err(e) = self
            .audit
            .log(ctx, subject_id, event_type, severity, details)
            .await
        {
            tracing::error!(subject_id, event_type, "Failed to write moderation audit event: {}", e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
