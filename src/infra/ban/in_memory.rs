// In-memory ban store.

use crate::core::ban::{BanHistoryEntry, BanRecord, BanStore, NewBanHistory};
use crate::core::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

pub struct InMemoryBanStore {
    /// Profile ID -> current record
    records: DashMap<String, BanRecord>,
    /// Profile ID -> history rows, oldest first
    history: DashMap<String, Vec<BanHistoryEntry>>,
    next_history_id: AtomicI64,
}

impl InMemoryBanStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            history: DashMap::new(),
            next_history_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryBanStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BanStore for InMemoryBanStore {
    async fn get(&self, profile_id: &str) -> Result<Option<BanRecord>, StoreError> {
        Ok(self.records.get(profile_id).map(|r| r.value().clone()))
    }

    async fn save(&self, record: &BanRecord) -> Result<(), StoreError> {
        self.records.insert(record.profile_id.clone(), record.clone());
        Ok(())
    }

    async fn append_history(&self, entry: NewBanHistory) -> Result<BanHistoryEntry, StoreError> {
        let stored = BanHistoryEntry {
            id: self.next_history_id.fetch_add(1, Ordering::SeqCst),
            profile_id: entry.profile_id,
            kind: entry.kind,
            reason: entry.reason,
            duration_hours: entry.duration_hours,
            issuer_id: entry.issuer_id,
            created_at: entry.created_at,
            lifted_at: None,
        };
        self.history
            .entry(stored.profile_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn close_open_history(
        &self,
        profile_id: &str,
        lifted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut closed = 0;
        if let Some(mut rows) = self.history.get_mut(profile_id) {
            for row in rows.iter_mut().filter(|r| r.kind.is_ban() && r.lifted_at.is_none()) {
                row.lifted_at = Some(lifted_at);
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn history(&self, profile_id: &str) -> Result<Vec<BanHistoryEntry>, StoreError> {
        Ok(self
            .history
            .get(profile_id)
            .map(|rows| rows.value().clone())
            .unwrap_or_default())
    }
}
