// SQLite-backed ban store.
//
// Tables:
// - ban_records: one row per profile, current state
// - ban_history: append-only bans and unbans, `lifted_at` filled once

use crate::core::ban::{BanHistoryEntry, BanHistoryKind, BanRecord, BanStore, NewBanHistory};
use crate::core::store_error::StoreError;
use crate::infra::sqlite::{db_err, from_millis, opt_from_millis, to_millis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteBanStore {
    pool: Pool<Sqlite>,
}

impl SqliteBanStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ban_records (
                profile_id TEXT PRIMARY KEY,
                is_banned BOOLEAN NOT NULL DEFAULT 0,
                banned_at INTEGER,
                banned_until INTEGER,
                reason TEXT,
                ban_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ban_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                profile_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                reason TEXT NOT NULL,
                duration_hours INTEGER,
                issuer_id TEXT,
                created_at INTEGER NOT NULL,
                lifted_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_ban_history_profile
                ON ban_history(profile_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_history(row: &SqliteRow) -> Result<BanHistoryEntry, StoreError> {
        let kind: String = row.get("kind");
        Ok(BanHistoryEntry {
            id: row.get("id"),
            profile_id: row.get("profile_id"),
            kind: BanHistoryKind::parse(&kind)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown ban kind: {}", kind)))?,
            reason: row.get("reason"),
            duration_hours: row.get("duration_hours"),
            issuer_id: row.get("issuer_id"),
            created_at: from_millis(row.get("created_at"))?,
            lifted_at: opt_from_millis(row.get("lifted_at"))?,
        })
    }
}

#[async_trait]
impl BanStore for SqliteBanStore {
    async fn get(&self, profile_id: &str) -> Result<Option<BanRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT profile_id, is_banned, banned_at, banned_until, reason, ban_count
            FROM ban_records WHERE profile_id = ?
            "#,
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let ban_count: i64 = row.get("ban_count");
        Ok(Some(BanRecord {
            profile_id: row.get("profile_id"),
            is_banned: row.get("is_banned"),
            banned_at: opt_from_millis(row.get("banned_at"))?,
            banned_until: opt_from_millis(row.get("banned_until"))?,
            reason: row.get("reason"),
            ban_count: ban_count as u32,
        }))
    }

    async fn save(&self, record: &BanRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ban_records (profile_id, is_banned, banned_at, banned_until, reason, ban_count)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(profile_id) DO UPDATE SET
                is_banned = excluded.is_banned,
                banned_at = excluded.banned_at,
                banned_until = excluded.banned_until,
                reason = excluded.reason,
                ban_count = excluded.ban_count
            "#,
        )
        .bind(&record.profile_id)
        .bind(record.is_banned)
        .bind(record.banned_at.map(to_millis))
        .bind(record.banned_until.map(to_millis))
        .bind(&record.reason)
        .bind(record.ban_count as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn append_history(&self, entry: NewBanHistory) -> Result<BanHistoryEntry, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ban_history (profile_id, kind, reason, duration_hours, issuer_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.profile_id)
        .bind(entry.kind.as_str())
        .bind(&entry.reason)
        .bind(entry.duration_hours)
        .bind(&entry.issuer_id)
        .bind(to_millis(entry.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(BanHistoryEntry {
            id: result.last_insert_rowid(),
            profile_id: entry.profile_id,
            kind: entry.kind,
            reason: entry.reason,
            duration_hours: entry.duration_hours,
            issuer_id: entry.issuer_id,
            created_at: entry.created_at,
            lifted_at: None,
        })
    }

    async fn close_open_history(
        &self,
        profile_id: &str,
        lifted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE ban_history SET lifted_at = ?
            WHERE profile_id = ? AND kind != ? AND lifted_at IS NULL
            "#,
        )
        .bind(to_millis(lifted_at))
        .bind(profile_id)
        .bind(BanHistoryKind::Unban.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn history(&self, profile_id: &str) -> Result<Vec<BanHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, profile_id, kind, reason, duration_hours, issuer_id, created_at, lifted_at
            FROM ban_history
            WHERE profile_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_history).collect()
    }
}
