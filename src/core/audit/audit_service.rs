// Audit trail service.
//
// This service handles:
// - Appending immutable audit events
// - Handing error/critical events to the ban engine for threshold evaluation
// - Per-severity retention
//
// The ban engine plugs in through `ViolationHandler` so this module does not
// depend on it.

use super::audit_models::{
    event_types, AuditEvent, AuditRetention, NewAuditEvent, Severity, ViolationQuery,
};
use crate::core::clock::Clock;
use crate::core::context::RequestContext;
use crate::core::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Invalid audit event: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append an event. Stored events are never updated.
    async fn append(&self, event: NewAuditEvent) -> Result<AuditEvent, StoreError>;

    /// Count a subject's events matching the query (`created_at >= since`).
    async fn count_violations(&self, query: &ViolationQuery<'_>) -> Result<u64, StoreError>;

    /// Count a subject's events of one type since the given time.
    async fn count_of_type(
        &self,
        subject_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Distinct subjects with at least one matching event since `since`,
    /// ordered by subject id.
    async fn subjects_with_violations(
        &self,
        since: DateTime<Utc>,
        severities: &[Severity],
        excluded_types: &[&str],
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Most recent events for a subject, newest first.
    async fn recent_for_subject(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError>;

    /// Delete events of one severity created before `older_than`.
    async fn purge(&self, severity: Severity, older_than: DateTime<Utc>)
        -> Result<u64, StoreError>;
}

/// Receives subjects whose latest event qualifies as a violation.
#[async_trait]
pub trait ViolationHandler: Send + Sync {
    async fn on_violation(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        violation_type: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct AuditService {
    store: Arc<dyn AuditStore>,
    handler: Option<Arc<dyn ViolationHandler>>,
    clock: Arc<dyn Clock>,
    retention: AuditRetention,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            handler: None,
            clock,
            retention: AuditRetention::default(),
        }
    }

    /// Route error/critical events to the given handler (normally the ban engine).
    pub fn with_violation_handler(mut self, handler: Arc<dyn ViolationHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_retention(mut self, retention: AuditRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Append an event about `subject_id`.
    ///
    /// Error and critical events then trigger a ban evaluation for the subject.
    /// A failed evaluation is logged; the audit row is already stored and is
    /// returned either way.
    pub async fn log(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        event_type: &str,
        severity: Severity,
        details: serde_json::Value,
    ) -> Result<AuditEvent, AuditError> {
        if subject_id.trim().is_empty() {
            return Err(AuditError::Validation("subject id is empty".to_string()));
        }
        if event_type.trim().is_empty() {
            return Err(AuditError::Validation("event type is empty".to_string()));
        }

        let event = self
            .store
            .append(NewAuditEvent {
                subject_id: subject_id.to_string(),
                event_type: event_type.to_string(),
                severity,
                details,
                ip: ctx.ip.clone(),
                created_at: self.clock.now(),
            })
            .await?;

        tracing::debug!(
            event_id = event.id,
            subject_id,
            event_type,
            severity = %severity,
            "Audit event recorded"
        );

        if severity.triggers_ban_check() && event_types::counts_toward_bans(event_type) {
            if let Some(handler) = &self.handler {
                if let Err(e) = handler.on_violation(ctx, subject_id, event_type).await {
                    tracing::error!(
                        subject_id,
                        event_type,
                        "Ban evaluation after audit event failed: {}",
                        e
                    );
                }
            }
        }

        Ok(event)
    }

    /// How many events of `event_type` the subject produced since `since`.
    pub async fn count_recent(
        &self,
        subject_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, AuditError> {
        Ok(self
            .store
            .count_of_type(subject_id, event_type, since)
            .await?)
    }

    pub async fn recent(&self, subject_id: &str, limit: usize) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(self.store.recent_for_subject(subject_id, limit).await?)
    }

    /// Apply the retention policy. Returns the number of deleted events.
    pub async fn purge_expired(&self) -> Result<u64, AuditError> {
        let now = self.clock.now();
        let mut purged = 0;

        for severity in [
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
        ] {
            if let Some(keep_for) = self.retention.for_severity(severity) {
                purged += self.store.purge(severity, now - keep_for).await?;
            }
        }

        if purged > 0 {
            tracing::info!(purged, "Purged expired audit events");
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
    use crate::infra::audit::InMemoryAuditStore;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every subject handed to it.
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ViolationHandler for RecordingHandler {
        async fn on_violation(
            &self,
            _ctx: &RequestContext,
            subject_id: &str,
            violation_type: &str,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.seen
                .lock()
                .unwrap()
                .push((subject_id.to_string(), violation_type.to_string()));
            Ok(())
        }
    }

    fn setup() -> (AuditService, Arc<RecordingHandler>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let handler = Arc::new(RecordingHandler::default());
        let service = AuditService::new(Arc::new(InMemoryAuditStore::new()), clock.clone())
            .with_violation_handler(handler.clone());
        (service, handler, clock)
    }

    #[tokio::test]
    async fn test_error_events_trigger_ban_check() {
        let (service, handler, _) = setup();
        let ctx = RequestContext::new("user-1").with_ip("10.0.0.1");

        let event = service
            .log(&ctx, "user-1", "spam_detected", Severity::Error, json!({}))
            .await
            .unwrap();

        assert_eq!(event.ip.as_deref(), Some("10.0.0.1"));
        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("user-1".to_string(), "spam_detected".to_string())]);
    }

    #[tokio::test]
    async fn test_info_and_warning_do_not_trigger() {
        let (service, handler, _) = setup();
        let ctx = RequestContext::new("user-1");

        service
            .log(&ctx, "user-1", "login", Severity::Info, json!({}))
            .await
            .unwrap();
        service
            .log(&ctx, "user-1", event_types::RATE_LIMIT_DENIED, Severity::Warning, json!({}))
            .await
            .unwrap();

        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ban_bookkeeping_never_triggers() {
        let (service, handler, _) = setup();
        let ctx = RequestContext::system();

        service
            .log(&ctx, "user-1", event_types::BAN_ISSUED, Severity::Critical, json!({}))
            .await
            .unwrap();

        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_event_type_rejected() {
        let (service, _, _) = setup();
        let result = service
            .log(&RequestContext::system(), "user-1", " ", Severity::Info, json!({}))
            .await;

        assert!(matches!(result, Err(AuditError::Validation(_))));
        assert!(service.recent("user-1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_respects_severity_retention() {
        let (service, _, clock) = setup();
        let ctx = RequestContext::system();

        service.log(&ctx, "user-1", "a", Severity::Info, json!({})).await.unwrap();
        service.log(&ctx, "user-1", "b", Severity::Error, json!({})).await.unwrap();
        service.log(&ctx, "user-1", "c", Severity::Critical, json!({})).await.unwrap();

        // 100 days later only the info event has aged out.
        clock.advance(Duration::days(100));
        assert_eq!(service.purge_expired().await.unwrap(), 1);

        // After two years the error event is gone too; critical stays forever.
        clock.advance(Duration::days(700));
        assert_eq!(service.purge_expired().await.unwrap(), 1);

        let remaining = service.recent("user-1", 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].severity, Severity::Critical);
    }
}
