// SQLite-backed rate-limit store.
//
// Tables:
// - rate_limit_events: append-only completed actions
// - rate_limit_resources: resources currently held per subject and action
// - rate_limit_spend: weighted-budget spend per fixed window

use crate::core::rate_limit::{RateLimitEvent, RateLimitStore};
use crate::core::store_error::StoreError;
use crate::infra::sqlite::{db_err, from_millis, to_millis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteRateLimitStore {
    pool: Pool<Sqlite>,
}

impl SqliteRateLimitStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_key TEXT NOT NULL,
                action TEXT NOT NULL,
                ts INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rate_limit_events_key
                ON rate_limit_events(subject_key, action, ts);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_resources (
                subject_key TEXT NOT NULL,
                action TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (subject_key, action)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_spend (
                subject_key TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                used INTEGER NOT NULL,
                PRIMARY KEY (subject_key, window_start)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for SqliteRateLimitStore {
    async fn record_event(&self, event: &RateLimitEvent) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO rate_limit_events (subject_key, action, ts) VALUES (?, ?, ?)")
            .bind(&event.subject_key)
            .bind(&event.action)
            .bind(to_millis(event.timestamp))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn event_times_since(
        &self,
        subject_key: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ts FROM rate_limit_events
            WHERE subject_key = ? AND action = ? AND ts >= ?
            ORDER BY ts ASC
            "#,
        )
        .bind(subject_key)
        .bind(action)
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(|r| from_millis(r.get("ts"))).collect()
    }

    async fn last_event(
        &self,
        subject_key: &str,
        action: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query(
            "SELECT MAX(ts) AS ts FROM rate_limit_events WHERE subject_key = ? AND action = ?",
        )
        .bind(subject_key)
        .bind(action)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let ts: Option<i64> = row.get("ts");
        ts.map(from_millis).transpose()
    }

    async fn active_resources(&self, subject_key: &str, action: &str) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "SELECT active FROM rate_limit_resources WHERE subject_key = ? AND action = ?",
        )
        .bind(subject_key)
        .bind(action)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| r.get::<i64, _>("active") as u32).unwrap_or(0))
    }

    async fn adjust_active_resources(
        &self,
        subject_key: &str,
        action: &str,
        delta: i32,
    ) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO rate_limit_resources (subject_key, action, active)
            VALUES (?, ?, MAX(?, 0))
            ON CONFLICT(subject_key, action) DO UPDATE SET
                active = MAX(rate_limit_resources.active + ?, 0)
            RETURNING active
            "#,
        )
        .bind(subject_key)
        .bind(action)
        .bind(delta as i64)
        .bind(delta as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.get::<i64, _>("active") as u32)
    }

    async fn try_consume(
        &self,
        subject_key: &str,
        window_start: DateTime<Utc>,
        cost: u32,
        budget: u32,
    ) -> Result<bool, StoreError> {
        if cost > budget {
            return Ok(false);
        }

        // The WHERE on the upsert makes check-and-add one statement.
        let result = sqlx::query(
            r#"
            INSERT INTO rate_limit_spend (subject_key, window_start, used)
            VALUES (?, ?, ?)
            ON CONFLICT(subject_key, window_start) DO UPDATE SET
                used = rate_limit_spend.used + excluded.used
            WHERE rate_limit_spend.used + excluded.used <= ?
            "#,
        )
        .bind(subject_key)
        .bind(to_millis(window_start))
        .bind(cost as i64)
        .bind(budget as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_events(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = to_millis(older_than);
        let result = sqlx::query("DELETE FROM rate_limit_events WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM rate_limit_spend WHERE window_start < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
