use crate::core::collaborators::{AccountDirectory, ContentDirectory, ContentItem};
use crate::core::store_error::StoreError;
use super::in_memory::select_candidates;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Content export kept in a single JSON file:
/// { "items": [ContentItem], "accounts": { subject_id: created_at } }
#[derive(Debug, Serialize, Deserialize, Default)]
struct JsonContentData {
    #[serde(default)]
    pub items: Vec<ContentItem>,
    #[serde(default)]
    pub accounts: HashMap<String, DateTime<Utc>>,
}

/// File-backed content and account directory. Only `last_checked` is ever
/// written back.
pub struct JsonContentDirectory {
    path: PathBuf,
    cache: RwLock<JsonContentData>,
}

impl JsonContentDirectory {
    /// Load the file, or start empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let cache: JsonContentData = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            JsonContentData::default()
        };

        tracing::debug!(
            path = %path.display(),
            items = cache.items.len(),
            accounts = cache.accounts.len(),
            "Loaded content file"
        );
        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    async fn persist(&self, data: &JsonContentData) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(data)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentDirectory for JsonContentDirectory {
    async fn scan_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>, StoreError> {
        let cache = self.cache.read().await;
        Ok(select_candidates(cache.items.iter(), stale_before, limit))
    }

    async fn get(&self, content_ref: &str) -> Result<Option<ContentItem>, StoreError> {
        let cache = self.cache.read().await;
        Ok(cache
            .items
            .iter()
            .find(|item| item.content_ref == content_ref)
            .cloned())
    }

    async fn mark_checked(&self, content_ref: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        let Some(item) = cache.items.iter_mut().find(|item| item.content_ref == content_ref) else {
            return Ok(());
        };
        item.last_checked = Some(at);
        self.persist(&cache).await
    }
}

#[async_trait]
impl AccountDirectory for JsonContentDirectory {
    async fn created_at(&self, subject_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let cache = self.cache.read().await;
        Ok(cache.accounts.get(subject_id).copied())
    }
}
