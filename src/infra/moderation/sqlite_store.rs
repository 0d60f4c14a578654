// SQLite-backed flag store.
//
// Tables:
// - moderation_flags: one row per flag; reasons and notes as JSON arrays

use crate::core::moderation::{
    FlagId, FlagSource, FlagState, FlagStore, ModerationFlag, NewFlag, MAX_PRIORITY,
};
use crate::core::store_error::StoreError;
use crate::infra::sqlite::{db_err, from_millis, opt_from_millis, to_millis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteFlagStore {
    pool: Pool<Sqlite>,
}

const FLAG_COLUMNS: &str = "id, content_ref, reasons, risk, source, reporter_id, priority, state, \
                            created_at, reviewed_at, reviewer_id, notes";

impl SqliteFlagStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_flags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_ref TEXT NOT NULL,
                reasons TEXT NOT NULL DEFAULT '[]',
                risk INTEGER NOT NULL,
                source TEXT NOT NULL,
                reporter_id TEXT,
                priority INTEGER NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL,
                reviewed_at INTEGER,
                reviewer_id TEXT,
                notes TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_flags_content
                ON moderation_flags(content_ref, source, state);
            CREATE INDEX IF NOT EXISTS idx_flags_queue
                ON moderation_flags(state, priority, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_flag(row: &SqliteRow) -> Result<ModerationFlag, StoreError> {
        let source: String = row.get("source");
        let state: String = row.get("state");
        let reasons: String = row.get("reasons");
        let notes: String = row.get("notes");
        let risk: i64 = row.get("risk");
        let priority: i64 = row.get("priority");

        Ok(ModerationFlag {
            id: row.get("id"),
            content_ref: row.get("content_ref"),
            reasons: serde_json::from_str(&reasons)?,
            risk: risk as u8,
            source: FlagSource::parse(&source)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown flag source: {}", source)))?,
            reporter_id: row.get("reporter_id"),
            priority: priority as u8,
            state: FlagState::parse(&state)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown flag state: {}", state)))?,
            created_at: from_millis(row.get("created_at"))?,
            reviewed_at: opt_from_millis(row.get("reviewed_at"))?,
            reviewer_id: row.get("reviewer_id"),
            notes: serde_json::from_str(&notes)?,
        })
    }

    fn rows_to_flags(rows: &[SqliteRow]) -> Result<Vec<ModerationFlag>, StoreError> {
        rows.iter().map(Self::row_to_flag).collect()
    }

    /// Duplicate check and insert. Runs inside the caller's write transaction.
    async fn insert_locked(
        conn: &mut SqliteConnection,
        flag: NewFlag,
        dedupe_since: Option<DateTime<Utc>>,
    ) -> Result<(FlagId, bool), StoreError> {
        let since = dedupe_since.map(to_millis);
        let existing = sqlx::query(
            r#"
            SELECT id FROM moderation_flags
            WHERE content_ref = ? AND source = ?
              AND (? IS NULL OR reporter_id = ?)
              AND (state != 'resolved' OR (? IS NOT NULL AND created_at >= ?))
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(&flag.content_ref)
        .bind(flag.source.as_str())
        .bind(&flag.reporter_id)
        .bind(&flag.reporter_id)
        .bind(since)
        .bind(since)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        if let Some(row) = existing {
            return Ok((row.get("id"), false));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO moderation_flags
                (content_ref, reasons, risk, source, reporter_id, priority, state, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&flag.content_ref)
        .bind(serde_json::to_string(&flag.reasons)?)
        .bind(flag.risk as i64)
        .bind(flag.source.as_str())
        .bind(&flag.reporter_id)
        .bind(flag.priority as i64)
        .bind(to_millis(flag.created_at))
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        Ok((result.last_insert_rowid(), true))
    }
}

#[async_trait]
impl FlagStore for SqliteFlagStore {
    async fn insert_unless_duplicate(
        &self,
        flag: NewFlag,
        dedupe_since: Option<DateTime<Utc>>,
    ) -> Result<(FlagId, bool), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;

        // IMMEDIATE takes the write lock up front so two writers cannot both
        // pass the duplicate check.
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;

        let result = Self::insert_locked(&mut conn, flag, dedupe_since).await;
        let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
        sqlx::query(end)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;

        result
    }

    async fn get(&self, id: FlagId) -> Result<Option<ModerationFlag>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM moderation_flags WHERE id = ?", FLAG_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(Self::row_to_flag).transpose()
    }

    async fn open_flags_for(&self, content_ref: &str) -> Result<Vec<ModerationFlag>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM moderation_flags WHERE content_ref = ? AND state != 'resolved' ORDER BY id",
            FLAG_COLUMNS
        ))
        .bind(content_ref)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Self::rows_to_flags(&rows)
    }

    async fn auto_resolve_candidates(
        &self,
        max_risk: u8,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ModerationFlag>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM moderation_flags f
            WHERE f.state = 'pending' AND f.risk < ? AND f.created_at <= ?
              AND NOT EXISTS (
                  SELECT 1 FROM moderation_flags r
                  WHERE r.content_ref = f.content_ref
                    AND r.id != f.id
                    AND r.source = ?
                    AND r.state != 'resolved'
              )
            ORDER BY f.created_at ASC, f.id ASC
            LIMIT ?
            "#,
            FLAG_COLUMNS
        ))
        .bind(max_risk as i64)
        .bind(to_millis(created_before))
        .bind(FlagSource::UserReport.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Self::rows_to_flags(&rows)
    }

    async fn escalation_candidates(
        &self,
        min_risk: u8,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ModerationFlag>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM moderation_flags
            WHERE state = 'pending' AND risk >= ? AND priority < ? AND created_at <= ?
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
            FLAG_COLUMNS
        ))
        .bind(min_risk as i64)
        .bind(MAX_PRIORITY as i64)
        .bind(to_millis(created_before))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Self::rows_to_flags(&rows)
    }

    async fn transition(
        &self,
        id: FlagId,
        from: &[FlagState],
        to: FlagState,
        reviewer_id: Option<&str>,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if from.is_empty() {
            return Ok(false);
        }

        let sql = format!(
            r#"
            UPDATE moderation_flags SET
                state = ?,
                reviewed_at = ?,
                reviewer_id = COALESCE(?, reviewer_id),
                notes = CASE WHEN ? IS NULL THEN notes ELSE json_insert(notes, '$[#]', ?) END
            WHERE id = ? AND state IN ({})
            "#,
            vec!["?"; from.len()].join(", ")
        );

        let mut q = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(to_millis(at))
            .bind(reviewer_id)
            .bind(note)
            .bind(note)
            .bind(id);
        for state in from {
            q = q.bind(state.as_str());
        }

        let result = q.execute(&self.pool).await.map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn bump_priority(
        &self,
        id: FlagId,
        expected: u8,
        new: u8,
        note: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE moderation_flags SET
                priority = ?,
                notes = json_insert(notes, '$[#]', ?)
            WHERE id = ? AND state = 'pending' AND priority = ?
            "#,
        )
        .bind(new as i64)
        .bind(note)
        .bind(id)
        .bind(expected as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn review_queue(&self, limit: usize) -> Result<Vec<ModerationFlag>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM moderation_flags
            WHERE state != 'resolved'
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT ?
            "#,
            FLAG_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Self::rows_to_flags(&rows)
    }

    async fn purge_resolved(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM moderation_flags WHERE state = 'resolved' AND reviewed_at < ?",
        )
        .bind(to_millis(before))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
