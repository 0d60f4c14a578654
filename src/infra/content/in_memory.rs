// In-memory content and account directories.

use crate::core::collaborators::{AccountDirectory, ContentDirectory, ContentItem};
use crate::core::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Items never scanned or scanned before `stale_before`, newest first.
pub(crate) fn select_candidates<'a>(
    items: impl Iterator<Item = &'a ContentItem>,
    stale_before: DateTime<Utc>,
    limit: usize,
) -> Vec<ContentItem> {
    let mut candidates: Vec<ContentItem> = items
        .filter(|item| item.last_checked.map_or(true, |at| at < stale_before))
        .cloned()
        .collect();
    candidates.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.content_ref.cmp(&b.content_ref))
    });
    candidates.truncate(limit);
    candidates
}

pub struct InMemoryContentDirectory {
    /// Content ref -> item
    items: DashMap<String, ContentItem>,
}

impl InMemoryContentDirectory {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    /// Add or replace an item.
    pub fn insert(&self, item: ContentItem) {
        self.items.insert(item.content_ref.clone(), item);
    }
}

impl Default for InMemoryContentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentDirectory for InMemoryContentDirectory {
    async fn scan_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>, StoreError> {
        let snapshot: Vec<ContentItem> = self.items.iter().map(|e| e.value().clone()).collect();
        Ok(select_candidates(snapshot.iter(), stale_before, limit))
    }

    async fn get(&self, content_ref: &str) -> Result<Option<ContentItem>, StoreError> {
        Ok(self.items.get(content_ref).map(|e| e.value().clone()))
    }

    async fn mark_checked(&self, content_ref: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut item) = self.items.get_mut(content_ref) {
            item.last_checked = Some(at);
        }
        Ok(())
    }
}

pub struct InMemoryAccountDirectory {
    /// Subject ID -> account creation time
    accounts: DashMap<String, DateTime<Utc>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    pub fn insert(&self, subject_id: impl Into<String>, created_at: DateTime<Utc>) {
        self.accounts.insert(subject_id.into(), created_at);
    }
}

impl Default for InMemoryAccountDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn created_at(&self, subject_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.accounts.get(subject_id).map(|at| *at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn item(content_ref: &str, created_at: DateTime<Utc>, last_checked: Option<DateTime<Utc>>) -> ContentItem {
        ContentItem {
            content_ref: content_ref.to_string(),
            author_id: None,
            text: Some("hello".to_string()),
            explicit: false,
            audio: None,
            status: Default::default(),
            created_at,
            last_checked,
        }
    }

    #[tokio::test]
    async fn test_candidates_are_stale_and_newest_first() {
        let dir = InMemoryContentDirectory::new();
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        let stale_before = now - Duration::hours(24);

        dir.insert(item("old-unchecked", now - Duration::days(3), None));
        dir.insert(item("new-unchecked", now - Duration::hours(1), None));
        dir.insert(item("fresh", now - Duration::days(2), Some(now - Duration::hours(2))));
        dir.insert(item("stale", now - Duration::days(2), Some(now - Duration::hours(30))));

        let refs: Vec<String> = dir
            .scan_candidates(stale_before, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.content_ref)
            .collect();
        assert_eq!(refs, vec!["new-unchecked", "stale", "old-unchecked"]);

        assert_eq!(dir.scan_candidates(stale_before, 1).await.unwrap().len(), 1);
    }
}
