// In-memory audit store, used by tests and embedders without a database.

use crate::core::audit::{AuditEvent, AuditStore, NewAuditEvent, Severity, ViolationQuery};
use crate::core::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

pub struct InMemoryAuditStore {
    /// Event id -> event
    events: DashMap<i64, AuditEvent>,
    next_id: AtomicI64,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_violation(event: &AuditEvent, since: DateTime<Utc>, severities: &[Severity], excluded: &[&str]) -> bool {
    event.created_at >= since
        && severities.contains(&event.severity)
        && !excluded.contains(&event.event_type.as_str())
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, event: NewAuditEvent) -> Result<AuditEvent, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = AuditEvent {
            id,
            subject_id: event.subject_id,
            event_type: event.event_type,
            severity: event.severity,
            details: event.details,
            ip: event.ip,
            created_at: event.created_at,
        };
        self.events.insert(id, stored.clone());
        Ok(stored)
    }

    async fn count_violations(&self, query: &ViolationQuery<'_>) -> Result<u64, StoreError> {
        Ok(self
            .events
            .iter()
            .filter(|e| {
                e.subject_id == query.subject_id
                    && matches_violation(e, query.since, query.severities, query.excluded_types)
            })
            .count() as u64)
    }

    async fn count_of_type(
        &self,
        subject_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.subject_id == subject_id && e.event_type == event_type && e.created_at >= since)
            .count() as u64)
    }

    async fn subjects_with_violations(
        &self,
        since: DateTime<Utc>,
        severities: &[Severity],
        excluded_types: &[&str],
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let subjects: BTreeSet<String> = self
            .events
            .iter()
            .filter(|e| matches_violation(e, since, severities, excluded_types))
            .map(|e| e.subject_id.clone())
            .collect();
        Ok(subjects.into_iter().take(limit).collect())
    }

    async fn recent_for_subject(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let mut events: Vec<AuditEvent> = self
            .events
            .iter()
            .filter(|e| e.subject_id == subject_id)
            .map(|e| e.value().clone())
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        events.truncate(limit);
        Ok(events)
    }

    async fn purge(&self, severity: Severity, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0;
        self.events.retain(|_, e| {
            let expired = e.severity == severity && e.created_at < older_than;
            if expired {
                removed += 1;
            }
            !expired
        });
        Ok(removed)
    }
}
