// In-memory flag store.
//
// A single lock guards the whole table so duplicate checks and inserts are
// atomic with respect to each other.

use crate::core::moderation::{
    FlagId, FlagSource, FlagState, FlagStore, ModerationFlag, NewFlag, MAX_PRIORITY,
};
use crate::core::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct FlagTable {
    flags: BTreeMap<FlagId, ModerationFlag>,
    last_id: FlagId,
}

pub struct InMemoryFlagStore {
    table: RwLock<FlagTable>,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(FlagTable::default()),
        }
    }
}

impl Default for InMemoryFlagStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Oldest first, ties by id.
fn sort_oldest_first(flags: &mut [ModerationFlag]) {
    flags.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn insert_unless_duplicate(
        &self,
        flag: NewFlag,
        dedupe_since: Option<DateTime<Utc>>,
    ) -> Result<(FlagId, bool), StoreError> {
        let mut table = self.table.write().await;

        let duplicate = table.flags.values().find(|f| {
            f.content_ref == flag.content_ref
                && f.source == flag.source
                && (flag.reporter_id.is_none() || f.reporter_id == flag.reporter_id)
                && (f.state.is_open() || dedupe_since.map_or(false, |since| f.created_at >= since))
        });
        if let Some(existing) = duplicate {
            return Ok((existing.id, false));
        }

        table.last_id += 1;
        let id = table.last_id;
        table.flags.insert(
            id,
            ModerationFlag {
                id,
                content_ref: flag.content_ref,
                reasons: flag.reasons,
                risk: flag.risk,
                source: flag.source,
                reporter_id: flag.reporter_id,
                priority: flag.priority,
                state: FlagState::Pending,
                created_at: flag.created_at,
                reviewed_at: None,
                reviewer_id: None,
                notes: Vec::new(),
            },
        );
        Ok((id, true))
    }

    async fn get(&self, id: FlagId) -> Result<Option<ModerationFlag>, StoreError> {
        Ok(self.table.read().await.flags.get(&id).cloned())
    }

    async fn open_flags_for(&self, content_ref: &str) -> Result<Vec<ModerationFlag>, StoreError> {
        Ok(self
            .table
            .read()
            .await
            .flags
            .values()
            .filter(|f| f.content_ref == content_ref && f.state.is_open())
            .cloned()
            .collect())
    }

    async fn auto_resolve_candidates(
        &self,
        max_risk: u8,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ModerationFlag>, StoreError> {
        let table = self.table.read().await;
        let reported_elsewhere = |flag: &ModerationFlag| {
            table.flags.values().any(|other| {
                other.id != flag.id
                    && other.content_ref == flag.content_ref
                    && other.source == FlagSource::UserReport
                    && other.state.is_open()
            })
        };

        let mut flags: Vec<ModerationFlag> = table
            .flags
            .values()
            .filter(|f| f.state == FlagState::Pending && f.risk < max_risk && f.created_at <= created_before)
            .filter(|f| !reported_elsewhere(f))
            .cloned()
            .collect();
        sort_oldest_first(&mut flags);
        flags.truncate(limit);
        Ok(flags)
    }

    async fn escalation_candidates(
        &self,
        min_risk: u8,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ModerationFlag>, StoreError> {
        let mut flags: Vec<ModerationFlag> = self
            .table
            .read()
            .await
            .flags
            .values()
            .filter(|f| {
                f.state == FlagState::Pending
                    && f.risk >= min_risk
                    && f.priority < MAX_PRIORITY
                    && f.created_at <= created_before
            })
            .cloned()
            .collect();
        sort_oldest_first(&mut flags);
        flags.truncate(limit);
        Ok(flags)
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
        let mut table = self.table.write().await;
        let Some(flag) = table.flags.get_mut(&id) else {
            return Ok(false);
        };
        if !from.contains(&flag.state) {
            return Ok(false);
        }

        flag.state = to;
        flag.reviewed_at = Some(at);
        if let Some(reviewer) = reviewer_id {
            flag.reviewer_id = Some(reviewer.to_string());
        }
        if let Some(note) = note {
            flag.notes.push(note.to_string());
        }
        Ok(true)
    }

    async fn bump_priority(
        &self,
        id: FlagId,
        expected: u8,
        new: u8,
        note: &str,
    ) -> Result<bool, StoreError> {
        let mut table = self.table.write().await;
        match table.flags.get_mut(&id) {
            Some(flag) if flag.state == FlagState::Pending && flag.priority == expected => {
                flag.priority = new;
                flag.notes.push(note.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn review_queue(&self, limit: usize) -> Result<Vec<ModerationFlag>, StoreError> {
        let mut flags: Vec<ModerationFlag> = self
            .table
            .read()
            .await
            .flags
            .values()
            .filter(|f| f.state.is_open())
            .cloned()
            .collect();
        flags.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        flags.truncate(limit);
        Ok(flags)
    }

    async fn purge_resolved(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut table = self.table.write().await;
        let count_before = table.flags.len();
        table.flags.retain(|_, f| {
            !(f.state == FlagState::Resolved && f.reviewed_at.map_or(false, |at| at < before))
        });
        Ok((count_before - table.flags.len()) as u64)
    }
}
