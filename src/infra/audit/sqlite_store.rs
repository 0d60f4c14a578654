// SQLite-backed audit store.
//
// Tables:
// - audit_events: append-only event rows, details as JSON text

use crate::core::audit::{AuditEvent, AuditStore, NewAuditEvent, Severity, ViolationQuery};
use crate::core::store_error::StoreError;
use crate::infra::sqlite::{db_err, from_millis, to_millis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteAuditStore {
    pool: Pool<Sqlite>,
}

/// `?, ?, ?` for an IN list of `n` values.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl SqliteAuditStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                ip TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_subject_time
                ON audit_events(subject_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_audit_severity_time
                ON audit_events(severity, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_event(row: &SqliteRow) -> Result<AuditEvent, StoreError> {
        let severity: String = row.get("severity");
        let details: String = row.get("details");
        Ok(AuditEvent {
            id: row.get("id"),
            subject_id: row.get("subject_id"),
            event_type: row.get("event_type"),
            severity: Severity::parse(&severity)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown severity: {}", severity)))?,
            details: serde_json::from_str(&details)?,
            ip: row.get("ip"),
            created_at: from_millis(row.get("created_at"))?,
        })
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, event: NewAuditEvent) -> Result<AuditEvent, StoreError> {
        let details = serde_json::to_string(&event.details)?;
        let result = sqlx::query(
            r#"
            INSERT INTO audit_events (subject_id, event_type, severity, details, ip, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.subject_id)
        .bind(&event.event_type)
        .bind(event.severity.as_str())
        .bind(details)
        .bind(&event.ip)
        .bind(to_millis(event.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(AuditEvent {
            id: result.last_insert_rowid(),
            subject_id: event.subject_id,
            event_type: event.event_type,
            severity: event.severity,
            details: event.details,
            ip: event.ip,
            created_at: event.created_at,
        })
    }

    async fn count_violations(&self, query: &ViolationQuery<'_>) -> Result<u64, StoreError> {
        if query.severities.is_empty() {
            return Ok(0);
        }

        let mut sql = format!(
            "SELECT COUNT(*) AS n FROM audit_events WHERE subject_id = ? AND created_at >= ? AND severity IN ({})",
            placeholders(query.severities.len())
        );
        if !query.excluded_types.is_empty() {
            sql.push_str(&format!(
                " AND event_type NOT IN ({})",
                placeholders(query.excluded_types.len())
            ));
        }

        let mut q = sqlx::query(&sql)
            .bind(query.subject_id)
            .bind(to_millis(query.since));
        for severity in query.severities {
            q = q.bind(severity.as_str());
        }
        for event_type in query.excluded_types {
            q = q.bind(*event_type);
        }

        let row = q.fetch_one(&self.pool).await.map_err(db_err)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn count_of_type(
        &self,
        subject_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM audit_events
            WHERE subject_id = ? AND event_type = ? AND created_at >= ?
            "#,
        )
        .bind(subject_id)
        .bind(event_type)
        .bind(to_millis(since))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn subjects_with_violations(
        &self,
        since: DateTime<Utc>,
        severities: &[Severity],
        excluded_types: &[&str],
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        if severities.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT DISTINCT subject_id FROM audit_events WHERE created_at >= ? AND severity IN ({})",
            placeholders(severities.len())
        );
        if !excluded_types.is_empty() {
            sql.push_str(&format!(
                " AND event_type NOT IN ({})",
                placeholders(excluded_types.len())
            ));
        }
        sql.push_str(" ORDER BY subject_id LIMIT ?");

        let mut q = sqlx::query(&sql).bind(to_millis(since));
        for severity in severities {
            q = q.bind(severity.as_str());
        }
        for event_type in excluded_types {
            q = q.bind(*event_type);
        }
        let rows = q
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows.iter().map(|r| r.get("subject_id")).collect())
    }

    async fn recent_for_subject(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, event_type, severity, details, ip, created_at
            FROM audit_events
            WHERE subject_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(subject_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn purge(&self, severity: Severity, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM audit_events WHERE severity = ? AND created_at < ?")
            .bind(severity.as_str())
            .bind(to_millis(older_than))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::event_types;
    use crate::infra::sqlite::memory_pool;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    async fn store() -> SqliteAuditStore {
        let store = SqliteAuditStore::new(memory_pool().await);
        store.migrate().await.unwrap();
        store
    }

    fn event(subject: &str, event_type: &str, severity: Severity, at: DateTime<Utc>) -> NewAuditEvent {
        NewAuditEvent {
            subject_id: subject.to_string(),
            event_type: event_type.to_string(),
            severity,
            details: json!({ "note": "test" }),
            ip: Some("10.1.1.1".to_string()),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_violation_counting_filters() {
        let store = store().await;
        let now = Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();

        store.append(event("p1", "spam", Severity::Error, now)).await.unwrap();
        store.append(event("p1", "abuse", Severity::Critical, now)).await.unwrap();
        store.append(event("p1", "login", Severity::Info, now)).await.unwrap();
        store
            .append(event("p1", event_types::BAN_ISSUED, Severity::Error, now))
            .await
            .unwrap();
        store
            .append(event("p1", "spam", Severity::Error, now - Duration::days(2)))
            .await
            .unwrap();
        store.append(event("p2", "spam", Severity::Error, now)).await.unwrap();

        let query = ViolationQuery {
            subject_id: "p1",
            since: now - Duration::hours(24),
            severities: &[Severity::Error, Severity::Critical],
            excluded_types: event_types::NON_COUNTING,
        };
        assert_eq!(store.count_violations(&query).await.unwrap(), 2);

        let subjects = store
            .subjects_with_violations(
                now - Duration::hours(24),
                &[Severity::Error, Severity::Critical],
                event_types::NON_COUNTING,
                10,
            )
            .await
            .unwrap();
        assert_eq!(subjects, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn test_recent_newest_first_and_purge() {
        let store = store().await;
        let t0 = Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();

        store.append(event("p1", "a", Severity::Info, t0)).await.unwrap();
        store
            .append(event("p1", "b", Severity::Warning, t0 + Duration::minutes(1)))
            .await
            .unwrap();

        let recent = store.recent_for_subject("p1", 10).await.unwrap();
        assert_eq!(recent[0].event_type, "b");
        assert_eq!(recent[1].details, json!({ "note": "test" }));
        assert_eq!(recent[1].created_at, t0);

        assert_eq!(store.purge(Severity::Info, t0 + Duration::seconds(1)).await.unwrap(), 1);
        assert_eq!(store.recent_for_subject("p1", 10).await.unwrap().len(), 1);
    }
}
